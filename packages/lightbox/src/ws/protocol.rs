//! WebSocket Protocol Types
//!
//! Message types for client-server communication. Every message is a
//! tagged-JSON text frame, except the archive payload, which follows its
//! `ArchiveReady` announcement as a single binary frame.

use serde::{Deserialize, Serialize};

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Share an image. `filedata` is the raw payload, base64-encoded
    /// (standard alphabet). Fire-and-forget: the server does not
    /// acknowledge; failures come back asynchronously as `Error`.
    UploadImage { filename: String, filedata: String },

    /// Fuzzy-search every stored key. Reply: `SearchResults`.
    Search { query: String },

    /// Request a zip of the given keys. Reply: `ArchiveReady` followed by
    /// one binary frame with the archive bytes. All-or-nothing: a single
    /// missing key fails the whole request with `Error`.
    DownloadImages { keys: Vec<String> },
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent as the first message after the handshake: the server-assigned
    /// connection id and the (possibly disambiguated) display name.
    Connected {
        connection_id: String,
        display_name: String,
    },

    /// Matched keys, best first.
    SearchResults { keys: Vec<String> },

    /// The next binary frame carries a zip archive of `byte_len` bytes.
    ArchiveReady { byte_len: usize },

    /// Request failure with a stable machine-readable code.
    Error { code: String, message: String },
}

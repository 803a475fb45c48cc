//! Ephemeral image-sharing core for Lightbox.
//!
//! One process-wide [`ShareRegistry`] owns every connected session and
//! every shared blob. State lives for the lifetime of the process and a
//! session's blobs for the lifetime of its connection. There is no
//! persistence, clustering, or reconnection.

pub mod archive;
pub mod error;
pub mod registry;
pub mod score;

pub use error::ShareError;
pub use registry::{
    DEFAULT_MAX_UPLOAD_BYTES, KEY_SEPARATOR, SearchHit, Session, ShareRegistry, blob_key,
    split_key,
};

//! WebSocket client for the share service.
//!
//! One `ShareClient` is one session on the server: everything it uploads
//! stays available exactly as long as the connection is open. Request/
//! response calls (search, download) fail after a fixed wait; the server
//! has no corresponding timeout of its own.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use ignore::WalkBuilder;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::debug;

use share_registry::ShareError;

use crate::config::CALL_TIMEOUT;
use crate::handlers::DISPLAY_NAME_HEADER;
use crate::ws::{ClientMessage, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ShareClient {
    ws: WsStream,
    server_url: String,
    connection_id: String,
    display_name: String,
}

impl ShareClient {
    /// Connect and register under `name`. The server may hand back a
    /// suffixed variant if the name is already taken.
    pub async fn connect(server_url: &str, name: &str) -> Result<Self, ShareError> {
        let connection_failed = || ShareError::ConnectionFailed {
            addr: server_url.to_string(),
        };

        let mut request = server_url
            .into_client_request()
            .map_err(|_| connection_failed())?;
        let header = HeaderValue::from_str(name).map_err(|_| connection_failed())?;
        request.headers_mut().insert(DISPLAY_NAME_HEADER, header);

        let (mut ws, _) = connect_async(request).await.map_err(|e| {
            debug!("WebSocket handshake failed: {}", e);
            connection_failed()
        })?;

        let first = tokio::time::timeout(CALL_TIMEOUT, next_server_message(&mut ws, server_url))
            .await
            .map_err(|_| connection_failed())??;

        match first {
            ServerMessage::Connected {
                connection_id,
                display_name,
            } => Ok(Self {
                ws,
                server_url: server_url.to_string(),
                connection_id,
                display_name,
            }),
            other => Err(unexpected_reply(&other)),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The display name the server assigned (possibly suffixed).
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Validate and upload a single image file. Returns the filename it
    /// was shared under.
    pub async fn upload_image(&mut self, path: &Path) -> Result<String, ShareError> {
        let bytes = std::fs::read(path).map_err(|_| ShareError::FileNotFound {
            path: path.to_path_buf(),
        })?;
        if !looks_like_image(&bytes) {
            return Err(ShareError::NotAnImage {
                path: path.to_path_buf(),
            });
        }

        let filename = sanitize_filename(
            &path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        self.send(&ClientMessage::UploadImage {
            filename: filename.clone(),
            filedata: BASE64.encode(&bytes),
        })
        .await?;
        Ok(filename)
    }

    /// Upload every image file under a folder, flattening relative paths
    /// into filenames. Non-image files are skipped, not errors. Returns
    /// the number of files uploaded.
    pub async fn upload_folder(&mut self, folder: &Path) -> Result<usize, ShareError> {
        if !folder.is_dir() {
            return Err(ShareError::FileNotFound {
                path: folder.to_path_buf(),
            });
        }
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "folder".to_string());

        let walker = WalkBuilder::new(folder).standard_filters(false).build();
        let mut count = 0;
        for entry in walker.flatten() {
            if entry.file_type().is_none_or(|ft| ft.is_dir()) {
                continue;
            }
            let path = entry.path();
            let Ok(bytes) = std::fs::read(path) else {
                continue;
            };
            if !looks_like_image(&bytes) {
                continue;
            }

            let rel = path.strip_prefix(folder).unwrap_or(path);
            let filename = sanitize_filename(&flatten_relative(&folder_name, rel));
            self.send(&ClientMessage::UploadImage {
                filename,
                filedata: BASE64.encode(&bytes),
            })
            .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Fuzzy-search the server's blob keys. The caller's own uploads never
    /// appear in the results.
    pub async fn search(&mut self, query: &str) -> Result<Vec<String>, ShareError> {
        let reply = self
            .call(&ClientMessage::Search {
                query: query.to_string(),
            })
            .await?;
        match reply {
            ServerMessage::SearchResults { keys } => Ok(keys),
            ServerMessage::Error { code, message } => Err(error_from_wire(&code, &message)),
            other => Err(unexpected_reply(&other)),
        }
    }

    /// Download the given keys as one zip archive.
    pub async fn download_images(&mut self, keys: &[String]) -> Result<Vec<u8>, ShareError> {
        let reply = self
            .call(&ClientMessage::DownloadImages {
                keys: keys.to_vec(),
            })
            .await?;
        let byte_len = match reply {
            ServerMessage::ArchiveReady { byte_len } => byte_len,
            ServerMessage::Error { code, message } => {
                return Err(error_from_wire(&code, &message));
            }
            other => return Err(unexpected_reply(&other)),
        };

        let bytes = tokio::time::timeout(
            CALL_TIMEOUT,
            next_binary_frame(&mut self.ws, &self.server_url),
        )
        .await
        .map_err(|_| ShareError::ConnectionFailed {
            addr: self.server_url.clone(),
        })??;

        if bytes.len() != byte_len {
            debug!(
                "Archive length mismatch: announced {}, received {}",
                byte_len,
                bytes.len()
            );
        }
        Ok(bytes)
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ShareError> {
        let json = serde_json::to_string(msg).map_err(|e| ShareError::WriteFailed {
            reason: e.to_string(),
        })?;
        self.ws
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| ShareError::ConnectionFailed {
                addr: self.server_url.clone(),
            })
    }

    async fn call(&mut self, msg: &ClientMessage) -> Result<ServerMessage, ShareError> {
        self.send(msg).await?;
        tokio::time::timeout(
            CALL_TIMEOUT,
            next_server_message(&mut self.ws, &self.server_url),
        )
        .await
        .map_err(|_| ShareError::ConnectionFailed {
            addr: self.server_url.clone(),
        })?
    }
}

/// Read frames until the next control message.
async fn next_server_message(ws: &mut WsStream, addr: &str) -> Result<ServerMessage, ShareError> {
    let closed = || ShareError::ConnectionFailed {
        addr: addr.to_string(),
    };
    loop {
        let frame = ws.next().await.ok_or_else(closed)?;
        match frame {
            Ok(tungstenite::Message::Text(text)) => {
                return serde_json::from_str(text.as_str()).map_err(|e| ShareError::Rejected {
                    code: "bad_message".to_string(),
                    message: e.to_string(),
                });
            }
            Ok(tungstenite::Message::Close(_)) | Err(_) => return Err(closed()),
            // Binary frames only follow an ArchiveReady we asked for;
            // anything else is dropped. Ping/pong handled by the library.
            Ok(_) => {}
        }
    }
}

/// Read frames until the next binary payload (an archive).
async fn next_binary_frame(ws: &mut WsStream, addr: &str) -> Result<Vec<u8>, ShareError> {
    let closed = || ShareError::ConnectionFailed {
        addr: addr.to_string(),
    };
    loop {
        let frame = ws.next().await.ok_or_else(closed)?;
        match frame {
            Ok(tungstenite::Message::Binary(bytes)) => return Ok(bytes.to_vec()),
            Ok(tungstenite::Message::Text(text)) => {
                // An Error can displace the announced binary frame.
                if let Ok(ServerMessage::Error { code, message }) =
                    serde_json::from_str(text.as_str())
                {
                    return Err(error_from_wire(&code, &message));
                }
            }
            Ok(tungstenite::Message::Close(_)) | Err(_) => return Err(closed()),
            Ok(_) => {}
        }
    }
}

/// Magic-byte sniff; decoding is left to whoever opens the archive.
fn looks_like_image(bytes: &[u8]) -> bool {
    image::guess_format(bytes).is_ok()
}

/// Collapse underscore runs so the result can never contain the server's
/// `owner__filename` separator.
fn sanitize_filename(filename: &str) -> String {
    let mut out = String::with_capacity(filename.len());
    let mut prev_underscore = false;
    for c in filename.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push(c);
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    out
}

/// Flatten a relative path into a single filename segment:
/// `holiday/day1/beach.png` shared from folder `pics` becomes
/// `pics_holiday_day1_beach.png`.
fn flatten_relative(folder_name: &str, rel: &Path) -> String {
    let flat = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_");
    format!("{folder_name}_{flat}")
}

/// Map a wire-level error back onto the local taxonomy.
fn error_from_wire(code: &str, message: &str) -> ShareError {
    match code {
        "key_not_found" => ShareError::KeyNotFound {
            key: message
                .strip_prefix("key not found: ")
                .unwrap_or(message)
                .to_string(),
        },
        _ => ShareError::Rejected {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

fn unexpected_reply(msg: &ServerMessage) -> ShareError {
    ShareError::Rejected {
        code: "unexpected_message".to_string(),
        message: format!("{msg:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_magic_is_an_image() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(b"body");
        assert!(looks_like_image(&bytes));
    }

    #[test]
    fn plain_text_is_not_an_image() {
        assert!(!looks_like_image(b"hello, i am a text file"));
    }

    #[test]
    fn sanitize_collapses_separator_runs() {
        assert_eq!(sanitize_filename("week__end.png"), "week_end.png");
        assert_eq!(sanitize_filename("cat.png"), "cat.png");
    }

    #[test]
    fn flatten_joins_components_with_underscores() {
        let rel = Path::new("holiday/day1/beach.png");
        assert_eq!(
            flatten_relative("pics", rel),
            "pics_holiday_day1_beach.png"
        );
    }

    #[test]
    fn wire_key_not_found_reconstructs_the_key() {
        let err = error_from_wire("key_not_found", "key not found: alice__cat.png");
        match err {
            ShareError::KeyNotFound { key } => assert_eq!(key, "alice__cat.png"),
            other => panic!("expected KeyNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unknown_wire_code_becomes_rejected() {
        let err = error_from_wire("payload_too_large", "payload of 60 bytes exceeds the cap");
        assert!(matches!(err, ShareError::Rejected { .. }));
    }
}

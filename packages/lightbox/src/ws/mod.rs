//! Share-service WebSocket plumbing
//!
//! One WebSocket per client process:
//! - session registered at upgrade, purged at teardown
//! - tagged-JSON control frames, binary frames for archive payloads

mod handler;
mod protocol;

pub use handler::handle_share_ws;
pub use protocol::{ClientMessage, ServerMessage};

//! Operator-facing commands: the share/fetch client side of the service.

mod client;
mod fetch;
mod share;

pub use client::ShareClient;
pub use fetch::fetch_command;
pub use share::share_command;

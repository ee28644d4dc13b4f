//! Command server for the integrad CI daemon.
//!
//! Listens on a unix socket and handles one JSON command per connection,
//! one connection at a time. Also provides the matching client.

pub mod client;
pub mod error;
pub mod handlers;
pub mod server;
pub mod shutdown;
pub mod state;

pub use client::{Client, ClientError};
pub use error::{CommandError, ServerError};
pub use server::Server;
pub use state::AppState;

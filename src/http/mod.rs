//! Transport, retry policy and the retrying connection.

pub mod connection;
pub mod request;
pub mod retry;
pub mod transport;

pub use connection::Connection;
pub use request::{Body, Request, Response, Target};
pub use retry::{RetryConfig, RetryDecision};
pub use transport::Transport;

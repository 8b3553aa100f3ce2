//! Authentication: credential material and token lifecycle.

pub mod credentials;
pub mod token;

pub use credentials::Credentials;
pub use token::{Token, TokenManager};

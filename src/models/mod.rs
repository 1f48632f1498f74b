//! Data models for session state and credentials

mod credentials;
mod session;

pub use credentials::*;
pub use session::*;

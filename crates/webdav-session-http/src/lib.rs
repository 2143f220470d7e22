//! HTTP side of the WebDAV session: a `reqwest` transport, configuration,
//! and the [`Session`] facade callers work with.

pub mod config;
mod exchange;
mod session;

pub use config::{Config, SessionOptions};
pub use exchange::ReqwestExchange;
pub use session::Session;

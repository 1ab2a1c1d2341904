pub mod blob;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pool;
pub mod reader;
pub mod registry;
pub mod request;
pub mod router;
pub mod server;
pub mod session;
pub mod wire;
pub mod writer;

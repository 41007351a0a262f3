pub mod blob;
pub mod chunker;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod meta;
pub mod reconstruct;
pub mod service;
pub mod store;
pub mod upload;

pub use error::{CaskError, ErrorKind, Result};

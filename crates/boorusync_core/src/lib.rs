pub mod destination;
pub mod error;
mod http;
pub mod media;
pub mod migrate;
pub mod source;

// sorel-api: Async Rust client for the Sorel Connect metadata service

pub mod error;
pub mod metadata;
pub mod transport;

pub use error::Error;
pub use metadata::{MetadataClient, MetadataDocument, MetadataResponse, RawDatapoint};
pub use transport::{TlsMode, TransportConfig};

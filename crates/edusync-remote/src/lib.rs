//! # edusync-remote
//!
//! Everything between the sync engine and the remote store: field-name
//! translation ([`adapter`]), the async [`RemoteStore`] transport trait, a
//! PostgREST client ([`HttpRemote`]) and an embedded backend
//! ([`InMemoryRemote`]).

pub mod adapter;
pub mod error;
pub mod http;
pub mod memory;
pub mod transport;

pub use error::RemoteError;
pub use http::HttpRemote;
pub use memory::InMemoryRemote;
pub use transport::RemoteStore;

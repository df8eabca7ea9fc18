// Types, records and message crypto shared by every EduSync crate.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod protocol;
pub mod records;
pub mod types;

pub use crypto::EnvelopeService;
pub use error::{CryptoError, ThreadIdError};
pub use keys::{DerivedThreadKeys, ExchangedThreadKeys, ThreadKeys};
pub use records::{CollectionRecord, Record};
pub use types::{Collection, MessageKind, ThreadId};

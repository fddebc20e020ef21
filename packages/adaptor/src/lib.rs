pub mod error;
mod keys;
mod sig;

pub use keys::{keygen, DecryptionKey, EncryptionKey};
pub use sig::AdaptorSignature;

pub type Result<T> = std::result::Result<T, error::Error>;

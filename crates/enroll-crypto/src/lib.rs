pub mod error;
pub mod identity;
pub mod role;
pub mod signal;

pub use error::CryptoError;
pub use identity::IdentityKeyPair;
pub use role::ServiceIdRole;
pub use signal::KeyProvisioner;

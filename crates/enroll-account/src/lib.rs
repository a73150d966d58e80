pub mod account;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod key_values;
pub mod logging;
pub mod prekey_metadata;
pub mod profile_key;
pub mod protocol_store;
pub mod recipients;
pub mod registration;
pub mod service_id;

pub use account::AccountState;
pub use config::EnrollConfig;
pub use error::RegistrationError;
pub use profile_key::ProfileKey;
pub use registration::{
    AccountStores, Collaborators, RegistrationData, RegistrationHandle, RegistrationRepository,
    VerifyResponse,
};
pub use service_id::ServiceId;

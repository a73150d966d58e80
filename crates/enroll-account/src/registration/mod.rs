mod data;
mod repository;

pub use data::{RecoveryCredential, RegistrationData, ServerConfirmation, VerifyResponse};
pub use repository::{AccountStores, Collaborators, RegistrationHandle, RegistrationRepository, RoleStores};

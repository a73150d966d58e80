pub mod memory_stores;
pub mod metadata;
pub mod prekeys;
pub mod provisioner;
pub mod store;

pub use memory_stores::{MemoryProtocolStore, MemorySenderKeyStore};
pub use metadata::{MemoryPreKeyMetadataStore, PreKeyMetadataStore};
pub use prekeys::{
    KyberPreKeyRecord, PreKeyCollection, PreKeyCollections, PreKeyRecord, PreKeyUpload,
    SignedPreKeyRecord,
};
pub use provisioner::{KeyProvisioner, ProvisioningConfig};
pub use store::{
    IdentityKeyStore, IdentityRecord, KyberPreKeyStore, PreKeyStore, ProtocolStore,
    SenderKeyStore, SessionStore, VerifiedStatus,
};

use serde::{Deserialize, Serialize};

/// One of the two cryptographic identities an account holds.
///
/// `Primary` is the account identity (ACI); `Secondary` is the
/// phone-number identity (PNI). Each role has its own identity key,
/// prekey ID space, and protocol store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceIdRole {
    Primary,
    Secondary,
}

impl ServiceIdRole {
    pub const ALL: [Self; 2] = [Self::Primary, Self::Secondary];

    /// Short, stable tag used in storage keys and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "aci",
            Self::Secondary => "pni",
        }
    }
}

impl std::fmt::Display for ServiceIdRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

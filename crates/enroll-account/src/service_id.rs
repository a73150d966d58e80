use enroll_crypto::ServiceIdRole;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RegistrationError;

/// A server-issued identifier for one of the account's roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    pub role: ServiceIdRole,
    pub uuid: Uuid,
}

impl ServiceId {
    pub fn new(role: ServiceIdRole, uuid: Uuid) -> Self {
        Self { role, uuid }
    }

    /// Parse a confirmed identifier, rejecting anything that is not a
    /// non-nil UUID. The secondary role also accepts its `PNI:` storage
    /// prefix.
    pub fn parse(role: ServiceIdRole, raw: &str) -> Result<Self, RegistrationError> {
        let trimmed = raw.trim();
        let bare = match role {
            ServiceIdRole::Secondary => trimmed.strip_prefix("PNI:").unwrap_or(trimmed),
            ServiceIdRole::Primary => trimmed,
        };
        let uuid = Uuid::parse_str(bare).map_err(|e| {
            RegistrationError::MalformedResponse(format!("invalid {role} identifier {raw:?}: {e}"))
        })?;
        if uuid.is_nil() {
            return Err(RegistrationError::MalformedResponse(format!(
                "nil {role} identifier"
            )));
        }
        Ok(Self { role, uuid })
    }

    /// Storage form: the bare UUID for the primary role, `PNI:`-prefixed
    /// for the secondary one.
    pub fn to_storage_string(&self) -> String {
        match self.role {
            ServiceIdRole::Primary => self.uuid.to_string(),
            ServiceIdRole::Secondary => format!("PNI:{}", self.uuid),
        }
    }

    /// Inverse of [`ServiceId::to_storage_string`].
    pub fn from_storage_string(raw: &str) -> Result<Self, RegistrationError> {
        match raw.strip_prefix("PNI:") {
            Some(rest) => Self::parse(ServiceIdRole::Secondary, rest),
            None => Self::parse(ServiceIdRole::Primary, raw),
        }
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

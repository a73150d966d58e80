use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

pub const PROFILE_KEY_LEN: usize = 32;

/// Secret used by contacts to decrypt the account's profile.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct ProfileKey([u8; PROFILE_KEY_LEN]);

impl ProfileKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; PROFILE_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; PROFILE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PROFILE_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a stored key. Returns `None` for anything that is not exactly
    /// 32 hex-encoded bytes, the same as a missing key.
    pub fn from_hex(raw: &str) -> Option<Self> {
        let bytes = hex::decode(raw).ok()?;
        <[u8; PROFILE_KEY_LEN]>::try_from(bytes.as_slice()).ok().map(Self)
    }
}

impl std::fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProfileKey(..)")
    }
}

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Long-term identity key pair for one service-identity role.
///
/// Created once per registration attempt and held in memory inside the
/// prekey collection until the server confirms the account. Every signed
/// and last-resort prekey of the role is signed with this key.
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore an identity key pair from a 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    /// Restore from a stored secret of unchecked length.
    pub fn from_secret_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret = <[u8; 32]>::try_from(bytes)
            .map_err(|_| CryptoError::InvalidKey("identity secret wrong length".into()))?;
        Ok(Self::from_secret_bytes(&secret))
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as raw bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Secret key bytes, for persisting into a protocol store.
    ///
    /// # Security
    /// This is the private key material.
    pub fn secret_key_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Sign a message with the identity private key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a raw signature against raw public key bytes.
    pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let public_key = <[u8; 32]>::try_from(public_key)
            .map_err(|_| CryptoError::InvalidKey("identity public key wrong length".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&public_key)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid identity public key: {e}")))?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| CryptoError::VerificationError(format!("malformed signature: {e}")))?;
        verifying_key
            .verify(message, &signature)
            .map_err(|e| CryptoError::VerificationError(e.to_string()))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

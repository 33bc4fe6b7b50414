//! Cryptographic key types with memory safety guarantees.
//!
//! Long-term identities are Ed25519; every Diffie-Hellman operation runs on
//! X25519. The conversion functions at the bottom map identity keys into the
//! DH group so that X3DH can mix identity and ephemeral secrets.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Constant-time equality, used for DH ratchet step detection
    #[must_use]
    pub fn ct_eq(&self, other: &PublicKey) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }

    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey([REDACTED])")
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(pk: X25519PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        PublicKey::from(X25519PublicKey::from(secret))
    }
}

/// X25519 secret key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a new random secret key from the injected entropy source.
    ///
    /// # Errors
    /// Returns [`Error::EntropyFailure`] if the source cannot fill the
    /// scalar.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Result<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        rng.try_fill_bytes(&mut bytes)
            .map_err(|_| Error::EntropyFailure)?;

        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        Ok(Self(secret))
    }

    /// Create from raw scalar bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Get the corresponding public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.0)
    }

    /// Perform Diffie-Hellman key agreement
    #[must_use]
    pub fn diffie_hellman(&self, public: &PublicKey) -> DhOutput {
        let shared = self.0.diffie_hellman(&public.to_x25519());
        DhOutput(*shared.as_bytes())
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Output of a Diffie-Hellman operation (32 bytes), zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_SIZE]);

impl DhOutput {
    /// Returns the shared secret bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Map an Ed25519 identity private key into the X25519 group.
///
/// The scalar is the clamped first half of SHA-512 over the 32-byte seed,
/// matching the Ed25519 secret scalar derivation (RFC 8032), so the result
/// corresponds to [`identity_dh_public`] of the matching verifying key.
#[must_use]
pub fn identity_dh_secret(identity: &SigningKey) -> SecretKey {
    let mut hash: [u8; 64] = Sha512::digest(identity.to_bytes()).into();

    let mut scalar = [0u8; KEY_SIZE];
    scalar.copy_from_slice(&hash[..KEY_SIZE]);
    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;

    let secret = SecretKey::from_bytes(scalar);
    scalar.zeroize();
    hash.zeroize();
    secret
}

/// Map an Ed25519 identity public key into the X25519 group.
///
/// The Edwards point is converted to its birationally equivalent Montgomery
/// form, u = (1 + y) / (1 - y).
#[must_use]
pub fn identity_dh_public(identity: &VerifyingKey) -> PublicKey {
    PublicKey::from_bytes(identity.to_montgomery().to_bytes())
}

/// Verify an Ed25519 signature over a signed pre-key's public bytes.
///
/// # Errors
/// Returns [`Error::BadSignature`] if the signature does not verify.
pub fn verify_spk_signature(
    identity: &VerifyingKey,
    spk_pub: &PublicKey,
    signature: &Signature,
) -> Result<()> {
    identity
        .verify(spk_pub.as_bytes(), signature)
        .map_err(Error::from)
}

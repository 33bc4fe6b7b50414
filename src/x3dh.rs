//! X3DH (Extended Triple Diffie-Hellman) key agreement.
//!
//! Both parties hold long-term Ed25519 identity keys. The party opening a
//! session publishes a fresh signed pre-key inside its offer; its peer
//! answers with an ephemeral key and completes the agreement. Three DH
//! computations are mixed into the session secret:
//!
//! - DH1 = DH(identity, SPK)
//! - DH2 = DH(ephemeral, identity)
//! - DH3 = DH(ephemeral, SPK)
//!
//! with identity keys mapped into the X25519 group. Both sides additionally
//! derive identical associated data binding the two identity keys, which
//! every later AEAD operation authenticates.

use crate::crypto::{derive_session_secret, SymmetricKey};
use crate::error::Result;
use crate::keys::{
    identity_dh_public, identity_dh_secret, verify_spk_signature, PublicKey, SecretKey,
};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;

/// Signed pre-key: an X25519 key pair whose public half is signed by the
/// owner's Ed25519 identity key.
///
/// A signed pre-key lives for exactly one handshake. The secret half is
/// zeroized when the pre-key is dropped.
#[derive(Clone)]
pub struct SignedPreKey {
    public: PublicKey,
    secret: SecretKey,
    signature: Signature,
}

impl SignedPreKey {
    /// Generate a pre-key pair and sign its public part.
    ///
    /// # Errors
    /// Returns [`crate::Error::EntropyFailure`] if the entropy source fails.
    pub fn generate<R: CryptoRngCore>(rng: &mut R, identity: &SigningKey) -> Result<Self> {
        let secret = SecretKey::generate(rng)?;
        let public = secret.public_key();
        let signature = identity.sign(public.as_bytes());

        Ok(Self {
            public,
            secret,
            signature,
        })
    }

    /// The pre-key's public half
    #[must_use]
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// The identity signature over the public half
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for SignedPreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPreKey")
            .field("public", &self.public)
            .finish()
    }
}

/// Outcome of the ephemeral-key side of the handshake.
pub struct InitiateResult {
    /// Session secret seeding the root ratchet
    pub shared_secret: SymmetricKey,
    /// Associated data bound into every AEAD operation
    pub associated_data: Vec<u8>,
    /// Ephemeral public key to transmit to the peer
    pub ephemeral_public: PublicKey,
}

impl std::fmt::Debug for InitiateResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiateResult")
            .field("ephemeral_public", &self.ephemeral_public)
            .finish()
    }
}

/// Outcome of the signed-pre-key side of the handshake.
pub struct RespondResult {
    /// Session secret seeding the root ratchet
    pub shared_secret: SymmetricKey,
    /// Associated data bound into every AEAD operation
    pub associated_data: Vec<u8>,
}

impl std::fmt::Debug for RespondResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespondResult").finish()
    }
}

/// Ephemeral-key side: verify the peer's signed pre-key, generate an
/// ephemeral key pair and derive the session secret.
///
/// # Errors
/// Returns [`crate::Error::BadSignature`] if the pre-key signature does not
/// verify, or [`crate::Error::EntropyFailure`] if the entropy source fails.
pub fn initiate<R: CryptoRngCore>(
    rng: &mut R,
    own_identity: &SigningKey,
    peer_identity: &VerifyingKey,
    peer_spk_pub: &PublicKey,
    peer_spk_sig: &Signature,
) -> Result<InitiateResult> {
    verify_spk_signature(peer_identity, peer_spk_pub, peer_spk_sig)?;

    let ephemeral = SecretKey::generate(rng)?;
    let own_dh_secret = identity_dh_secret(own_identity);
    let peer_dh_public = identity_dh_public(peer_identity);

    let dh1 = own_dh_secret.diffie_hellman(peer_spk_pub);
    let dh2 = ephemeral.diffie_hellman(&peer_dh_public);
    let dh3 = ephemeral.diffie_hellman(peer_spk_pub);

    let shared_secret = derive_session_secret(&dh1, &dh2, &dh3);

    let mut associated_data = Vec::with_capacity(64);
    associated_data.extend_from_slice(own_identity.verifying_key().as_bytes());
    associated_data.extend_from_slice(peer_identity.as_bytes());

    Ok(InitiateResult {
        shared_secret,
        associated_data,
        ephemeral_public: ephemeral.public_key(),
    })
}

/// Signed-pre-key side: mirror the peer's DH computations with the pre-key
/// secret and the received ephemeral public key.
#[must_use]
pub fn respond(
    own_identity: &SigningKey,
    peer_identity: &VerifyingKey,
    spk: &SignedPreKey,
    peer_ephemeral: &PublicKey,
) -> RespondResult {
    let own_dh_secret = identity_dh_secret(own_identity);
    let peer_dh_public = identity_dh_public(peer_identity);

    let dh1 = spk.secret().diffie_hellman(&peer_dh_public);
    let dh2 = own_dh_secret.diffie_hellman(peer_ephemeral);
    let dh3 = spk.secret().diffie_hellman(peer_ephemeral);

    let shared_secret = derive_session_secret(&dh1, &dh2, &dh3);

    let mut associated_data = Vec::with_capacity(64);
    associated_data.extend_from_slice(peer_identity.as_bytes());
    associated_data.extend_from_slice(own_identity.verifying_key().as_bytes());

    RespondResult {
        shared_secret,
        associated_data,
    }
}

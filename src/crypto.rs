//! Key derivation for the handshake and both ratchets.
//!
//! Four KDFs share inputs drawn from the same chains, so each one carries
//! its own domain tag: 0x00 and 0x01 for the chain KDF outputs, 0x02 for
//! the root KDF and 0x03 for the AEAD parameter expansion.

use crate::keys::DhOutput;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Size of symmetric keys (32 bytes for 256-bit security)
pub const KEY_SIZE: usize = 32;

/// Chain KDF tag deriving the next chain key
const CHAIN_TAG_CK: u8 = 0x00;

/// Chain KDF tag deriving the message key
const CHAIN_TAG_MK: u8 = 0x01;

/// Root KDF HKDF info
const ROOT_INFO: &[u8] = &[0x02];

/// AEAD parameter HKDF info
const AEAD_INFO: &[u8] = &[0x03];

/// Prefix mixed into the handshake secret's input key material
const HANDSHAKE_IKM_PREFIX: [u8; 32] = [0xFF; 32];

/// Derived symmetric key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get key as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Chain KDF: `(ck', mk) = KDF_CK(ck)`.
///
/// HMAC-SHA256 keyed by the chain key over the single byte 0x00 yields the
/// next chain key; the same HMAC over 0x01 yields the message key.
#[must_use]
pub fn chain_kdf(chain_key: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
    let derive = |tag: u8| {
        let mut mac = HmacSha256::new_from_slice(chain_key.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(&[tag]);
        SymmetricKey(mac.finalize().into_bytes().into())
    };

    let next_chain_key = derive(CHAIN_TAG_CK);
    let message_key = derive(CHAIN_TAG_MK);

    (next_chain_key, message_key)
}

/// Root KDF: `(rk', ck) = KDF_RK(rk, dh_out)`.
///
/// HKDF-SHA256 with the DH output as input key material and the current
/// root key as salt; 64 bytes of output split into the next root key and a
/// fresh chain key.
#[must_use]
pub fn root_kdf(root_key: &SymmetricKey, dh_out: &DhOutput) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_bytes()), dh_out.as_bytes());

    let mut okm = [0u8; 2 * KEY_SIZE];
    hkdf.expand(ROOT_INFO, &mut okm)
        .expect("output size is valid");

    let next_root = SymmetricKey(okm[..KEY_SIZE].try_into().expect("split is exact"));
    let chain_key = SymmetricKey(okm[KEY_SIZE..].try_into().expect("split is exact"));

    okm.zeroize();
    (next_root, chain_key)
}

/// AEAD parameters expanded from a single message key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct AeadParams {
    pub(crate) enc_key: [u8; KEY_SIZE],
    pub(crate) auth_key: [u8; KEY_SIZE],
    pub(crate) iv: [u8; 16],
}

/// Expand a message key into AES-256 key, HMAC key and IV.
///
/// HKDF-SHA256 with the message key as input key material, an all-zero
/// salt and 80 bytes of output split as (32, 32, 16).
#[must_use]
pub(crate) fn aead_params(message_key: &SymmetricKey) -> AeadParams {
    let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; KEY_SIZE]), message_key.as_bytes());

    let mut okm = [0u8; 80];
    hkdf.expand(AEAD_INFO, &mut okm)
        .expect("output size is valid");

    let params = AeadParams {
        enc_key: okm[..32].try_into().expect("split is exact"),
        auth_key: okm[32..64].try_into().expect("split is exact"),
        iv: okm[64..].try_into().expect("split is exact"),
    };

    okm.zeroize();
    params
}

/// Derive the session secret from the three handshake DH outputs.
///
/// HKDF-SHA256 with an all-zero salt, empty info and input key material
/// `0xFF^32 || dh1 || dh2 || dh3`, following the X3DH recommendation for
/// curves with cofactor concerns.
#[must_use]
pub fn derive_session_secret(dh1: &DhOutput, dh2: &DhOutput, dh3: &DhOutput) -> SymmetricKey {
    let mut ikm = [0u8; 4 * KEY_SIZE];
    ikm[..32].copy_from_slice(&HANDSHAKE_IKM_PREFIX);
    ikm[32..64].copy_from_slice(dh1.as_bytes());
    ikm[64..96].copy_from_slice(dh2.as_bytes());
    ikm[96..].copy_from_slice(dh3.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; KEY_SIZE]), &ikm);

    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(&[], &mut okm).expect("output size is valid");

    ikm.zeroize();
    SymmetricKey(okm)
}

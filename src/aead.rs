//! AEAD codec used by the ratchet: AES-256-CBC with an HMAC-SHA256 tag.
//!
//! Every message key is expanded into a fresh (encryption key, MAC key, IV)
//! triple, the plaintext is PKCS#7 padded and CBC encrypted, and the 32-byte
//! tag is appended. The tag authenticates the associated data; the
//! ciphertext itself is bound through the per-message key derivation.

use crate::crypto::{aead_params, SymmetricKey};
use crate::error::{Error, Result};

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size in bytes
pub(crate) const BLOCK_SIZE: usize = 16;

/// Authentication tag size in bytes
pub(crate) const TAG_SIZE: usize = 32;

/// Encrypt a plaintext under a message key, appending the tag.
pub(crate) fn encrypt(
    message_key: &SymmetricKey,
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    let params = aead_params(message_key);

    let padded = Zeroizing::new(pkcs7_pad(plaintext, BLOCK_SIZE)?);

    let cipher = Aes256CbcEnc::new_from_slices(&params.enc_key, &params.iv)
        .map_err(|_| Error::InternalInvariant)?;
    let mut ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&padded);

    let mut mac =
        HmacSha256::new_from_slice(&params.auth_key).expect("HMAC accepts any key size");
    mac.update(associated_data);
    ciphertext.extend_from_slice(&mac.finalize().into_bytes());

    Ok(ciphertext)
}

/// Decrypt a ciphertext under a message key, verifying padding and tag.
pub(crate) fn decrypt(
    message_key: &SymmetricKey,
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < BLOCK_SIZE + TAG_SIZE {
        return Err(Error::Malformed);
    }

    let (aes_part, tag) = ciphertext.split_at(ciphertext.len() - TAG_SIZE);
    if aes_part.len() % BLOCK_SIZE != 0 {
        return Err(Error::Malformed);
    }

    let params = aead_params(message_key);

    let cipher = Aes256CbcDec::new_from_slices(&params.enc_key, &params.iv)
        .map_err(|_| Error::InternalInvariant)?;
    let padded = Zeroizing::new(
        cipher
            .decrypt_padded_vec_mut::<NoPadding>(aes_part)
            .map_err(|_| Error::Malformed)?,
    );

    let mut plaintext = pkcs7_unpad(&padded, BLOCK_SIZE)?;

    let mut mac =
        HmacSha256::new_from_slice(&params.auth_key).expect("HMAC accepts any key size");
    mac.update(associated_data);
    let expected = mac.finalize().into_bytes();

    if bool::from(expected.ct_eq(tag)) {
        Ok(plaintext)
    } else {
        plaintext.zeroize();
        Err(Error::MacMismatch)
    }
}

/// PKCS#7 pad to a multiple of `block_size`.
///
/// Padding is always appended; already aligned input gains a full block.
/// Valid block sizes are 1 through 255.
pub(crate) fn pkcs7_pad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    if block_size == 0 || block_size > 255 {
        return Err(Error::BadPadding);
    }

    let pad_len = block_size - data.len() % block_size;

    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);

    Ok(padded)
}

/// Strict PKCS#7 unpad: the count must lie in `1..=block_size` and every
/// pad byte must equal the count.
pub(crate) fn pkcs7_unpad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    if block_size == 0 || block_size > 255 {
        return Err(Error::BadPadding);
    }
    if data.is_empty() || data.len() % block_size != 0 {
        return Err(Error::BadPadding);
    }

    let pad_len = data[data.len() - 1] as usize;
    if pad_len == 0 || pad_len > block_size {
        return Err(Error::BadPadding);
    }

    let (body, pad) = data.split_at(data.len() - pad_len);
    if pad.iter().any(|&b| b as usize != pad_len) {
        return Err(Error::BadPadding);
    }

    Ok(body.to_vec())
}

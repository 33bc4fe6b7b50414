//! Wire envelope codec.
//!
//! Every message travels as printable ASCII: a fixed prefix, one tag digit,
//! the standard-base64 body and a fixed suffix. Body layouts per tag:
//!
//! - offer (1): `idKey(32) || spKey(32) || spSig(64)`
//! - acknowledge (2): `idKey(32) || eKey(32) || ciphertext(>= 1)`
//! - data (3): raw ratchet ciphertext
//! - close (4): the single byte 0xFF

use crate::aead;
use crate::double_ratchet::HEADER_LEN;
use crate::error::{Error, Result};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use subtle::ConstantTimeEq;

/// Marks the beginning of an encoded message
pub(crate) const PREFIX: &str = "!XO!";

/// Marks the end of an encoded message
pub(crate) const SUFFIX: &str = "!OX!";

const TAG_OFFER: u8 = b'1';
const TAG_ACK: u8 = b'2';
const TAG_DATA: u8 = b'3';
const TAG_CLOSE: u8 = b'4';

const OFFER_LEN: usize = 32 + 32 + 64;
const ACK_HEAD_LEN: usize = 32 + 32;
const DATA_MIN_LEN: usize = HEADER_LEN + aead::BLOCK_SIZE + aead::TAG_SIZE;
const CLOSE_PAYLOAD: [u8; 1] = [0xFF];

/// Offer body: the opener's identity key and signed pre-key material.
pub(crate) struct OfferPayload {
    pub(crate) id_key: [u8; 32],
    pub(crate) sp_key: [u8; 32],
    pub(crate) sp_sig: [u8; 64],
}

/// Acknowledge body: the answerer's identity key, ephemeral key and the
/// initial ratchet ciphertext.
pub(crate) struct AckPayload {
    pub(crate) id_key: [u8; 32],
    pub(crate) e_key: [u8; 32],
    pub(crate) cipher: Vec<u8>,
}

/// A decoded wire message.
pub(crate) enum Envelope {
    Offer(OfferPayload),
    Ack(AckPayload),
    Data(Vec<u8>),
    Close,
}

impl Envelope {
    /// Encode into the printable wire form.
    pub(crate) fn encode(&self) -> String {
        let (tag, body) = match self {
            Envelope::Offer(offer) => {
                let mut body = Vec::with_capacity(OFFER_LEN);
                body.extend_from_slice(&offer.id_key);
                body.extend_from_slice(&offer.sp_key);
                body.extend_from_slice(&offer.sp_sig);
                (TAG_OFFER, body)
            }
            Envelope::Ack(ack) => {
                let mut body = Vec::with_capacity(ACK_HEAD_LEN + ack.cipher.len());
                body.extend_from_slice(&ack.id_key);
                body.extend_from_slice(&ack.e_key);
                body.extend_from_slice(&ack.cipher);
                (TAG_ACK, body)
            }
            Envelope::Data(cipher) => (TAG_DATA, cipher.clone()),
            Envelope::Close => (TAG_CLOSE, CLOSE_PAYLOAD.to_vec()),
        };

        format!("{PREFIX}{}{}{SUFFIX}", tag as char, BASE64.encode(body))
    }

    /// Decode from the printable wire form.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for missing affixes, an unknown tag,
    /// invalid base64 or a body of the wrong length.
    pub(crate) fn decode(input: &str) -> Result<Self> {
        let inner = input
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(SUFFIX))
            .ok_or(Error::Malformed)?;

        let bytes = inner.as_bytes();
        let (&tag, body64) = bytes.split_first().ok_or(Error::Malformed)?;
        let body = BASE64.decode(body64)?;

        match tag {
            TAG_OFFER => {
                if body.len() != OFFER_LEN {
                    return Err(Error::Malformed);
                }

                let mut offer = OfferPayload {
                    id_key: [0u8; 32],
                    sp_key: [0u8; 32],
                    sp_sig: [0u8; 64],
                };
                offer.id_key.copy_from_slice(&body[..32]);
                offer.sp_key.copy_from_slice(&body[32..64]);
                offer.sp_sig.copy_from_slice(&body[64..]);

                Ok(Envelope::Offer(offer))
            }
            TAG_ACK => {
                if body.len() <= ACK_HEAD_LEN {
                    return Err(Error::Malformed);
                }

                let mut ack = AckPayload {
                    id_key: [0u8; 32],
                    e_key: [0u8; 32],
                    cipher: body[ACK_HEAD_LEN..].to_vec(),
                };
                ack.id_key.copy_from_slice(&body[..32]);
                ack.e_key.copy_from_slice(&body[32..64]);

                Ok(Envelope::Ack(ack))
            }
            TAG_DATA => {
                if body.len() < DATA_MIN_LEN {
                    return Err(Error::Malformed);
                }

                Ok(Envelope::Data(body))
            }
            TAG_CLOSE => {
                if body.len() != CLOSE_PAYLOAD.len()
                    || !bool::from(body.ct_eq(&CLOSE_PAYLOAD))
                {
                    return Err(Error::Malformed);
                }

                Ok(Envelope::Close)
            }
            _ => Err(Error::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_roundtrip() {
        let encoded = Envelope::Offer(OfferPayload {
            id_key: [1u8; 32],
            sp_key: [2u8; 32],
            sp_sig: [3u8; 64],
        })
        .encode();

        assert!(encoded.starts_with("!XO!1"));
        assert!(encoded.ends_with(SUFFIX));

        match Envelope::decode(&encoded).unwrap() {
            Envelope::Offer(offer) => {
                assert_eq!(offer.id_key, [1u8; 32]);
                assert_eq!(offer.sp_key, [2u8; 32]);
                assert_eq!(offer.sp_sig, [3u8; 64]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_ack_roundtrip() {
        let encoded = Envelope::Ack(AckPayload {
            id_key: [4u8; 32],
            e_key: [5u8; 32],
            cipher: vec![6u8; 104],
        })
        .encode();

        match Envelope::decode(&encoded).unwrap() {
            Envelope::Ack(ack) => {
                assert_eq!(ack.id_key, [4u8; 32]);
                assert_eq!(ack.e_key, [5u8; 32]);
                assert_eq!(ack.cipher, vec![6u8; 104]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_data_roundtrip() {
        let cipher = vec![7u8; DATA_MIN_LEN];
        let encoded = Envelope::Data(cipher.clone()).encode();

        match Envelope::decode(&encoded).unwrap() {
            Envelope::Data(body) => assert_eq!(body, cipher),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_close_roundtrip() {
        let encoded = Envelope::Close.encode();
        assert!(matches!(Envelope::decode(&encoded), Ok(Envelope::Close)));
    }

    #[test]
    fn test_close_payload_must_be_exact() {
        let forged = format!("{PREFIX}4{}{SUFFIX}", BASE64.encode([0xFEu8]));
        assert_eq!(Envelope::decode(&forged).err(), Some(Error::Malformed));

        let forged = format!("{PREFIX}4{}{SUFFIX}", BASE64.encode([0xFFu8, 0xFF]));
        assert_eq!(Envelope::decode(&forged).err(), Some(Error::Malformed));
    }

    #[test]
    fn test_missing_affixes() {
        let encoded = Envelope::Close.encode();

        assert!(Envelope::decode(&encoded[1..]).is_err());
        assert!(Envelope::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Envelope::decode("").is_err());
        assert!(Envelope::decode("!XO!!OX!").is_err());
    }

    #[test]
    fn test_unknown_tag() {
        for tag in ['0', '5', '9', 'x'] {
            let forged = format!("{PREFIX}{tag}{}{SUFFIX}", BASE64.encode([0xFFu8]));
            assert_eq!(Envelope::decode(&forged).err(), Some(Error::Malformed));
        }
    }

    #[test]
    fn test_invalid_base64() {
        let forged = format!("{PREFIX}3§§not-base64§§{SUFFIX}");
        assert_eq!(Envelope::decode(&forged).err(), Some(Error::Malformed));
    }

    #[test]
    fn test_wrong_body_lengths() {
        let short_offer = format!("{PREFIX}1{}{SUFFIX}", BASE64.encode([0u8; 127]));
        assert_eq!(Envelope::decode(&short_offer).err(), Some(Error::Malformed));

        let short_ack = format!("{PREFIX}2{}{SUFFIX}", BASE64.encode([0u8; 64]));
        assert_eq!(Envelope::decode(&short_ack).err(), Some(Error::Malformed));

        let short_data = format!("{PREFIX}3{}{SUFFIX}", BASE64.encode([0u8; 87]));
        assert_eq!(Envelope::decode(&short_data).err(), Some(Error::Malformed));
    }
}

//! Session state machine tying handshake, ratchet and wire codec together.
//!
//! Each party constructs a [`Session`] with its long-term Ed25519 identity
//! key, a callback to verify the peer's public identity key, and an entropy
//! source. The opening party calls [`Session::offer`]; the peer answers
//! with [`Session::acknowledge`]; once the opener has processed that answer
//! through [`Session::receive`], both directions are established and
//! [`Session::send`] / [`Session::receive`] exchange encrypted payloads
//! until either side calls [`Session::close`].
//!
//! Whether a peer key is trustworthy is outside this crate's scope. The
//! callback may compare against a key exchanged over another secure channel
//! or apply trust on first use.

use crate::double_ratchet::DoubleRatchet;
use crate::error::{Error, Result};
use crate::keys::PublicKey;
use crate::message::{AckPayload, Envelope, OfferPayload};
use crate::x3dh::{self, SignedPreKey};

use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;
use zeroize::Zeroize;

/// Length of the throwaway payload inside the acknowledge message. Padding
/// fills it up to exactly two AES blocks.
const INITIAL_PAYLOAD_LEN: usize = 23;

/// Outcome of [`Session::receive`] for one incoming message.
///
/// Exactly one outcome is produced per successfully processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// The peer's acknowledgement completed the handshake
    Established,
    /// A data message carrying decrypted plaintext
    Data(Vec<u8>),
    /// The peer closed the session
    Closed,
}

enum State {
    Fresh,
    OfferSent(SignedPreKey),
    Established(Box<DoubleRatchet>),
    Closed,
}

/// An end-to-end encrypted session between two parties.
pub struct Session<R, F>
where
    R: CryptoRngCore,
    F: Fn(&VerifyingKey) -> bool,
{
    identity: SigningKey,
    verify_peer: F,
    rng: R,
    state: State,
}

impl<R, F> Session<R, F>
where
    R: CryptoRngCore,
    F: Fn(&VerifyingKey) -> bool,
{
    /// Create a fresh session.
    ///
    /// `verify_peer` is invoked with the peer's raw identity key while
    /// processing its first message; returning `false` aborts the handshake
    /// with [`Error::PeerRejected`].
    pub fn new(identity: SigningKey, verify_peer: F, rng: R) -> Self {
        Self {
            identity,
            verify_peer,
            rng,
            state: State::Fresh,
        }
    }

    /// Whether the handshake completed and data may be exchanged.
    #[must_use]
    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established(_))
    }

    /// Whether this session was closed, locally or by the peer.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Open the session by offering an upgrade to the peer.
    ///
    /// Generates the signed pre-key advertised in the offer message. The
    /// peer is expected to answer with an acknowledgement.
    ///
    /// # Errors
    /// [`Error::UnexpectedMessage`] unless the session is fresh;
    /// [`Error::EntropyFailure`] if pre-key generation fails.
    pub fn offer(&mut self) -> Result<String> {
        if !matches!(self.state, State::Fresh) {
            return Err(Error::UnexpectedMessage);
        }

        let spk = SignedPreKey::generate(&mut self.rng, &self.identity)?;

        let encoded = Envelope::Offer(OfferPayload {
            id_key: self.identity.verifying_key().to_bytes(),
            sp_key: *spk.public().as_bytes(),
            sp_sig: spk.signature().to_bytes(),
        })
        .encode();

        self.state = State::OfferSent(spk);
        Ok(encoded)
    }

    /// Answer a peer's offer, establishing this side of the session.
    ///
    /// Verifies the peer, completes the key agreement and returns the
    /// acknowledge message, which embeds a first throwaway ciphertext so
    /// the peer can confirm key agreement before any application data.
    ///
    /// # Errors
    /// [`Error::UnexpectedMessage`] unless the session is fresh and the
    /// message is an offer; [`Error::PeerRejected`] if the verification
    /// callback refuses the peer; [`Error::BadSignature`] for an invalid
    /// pre-key signature; [`Error::Malformed`] for undecodable input.
    pub fn acknowledge(&mut self, offer: &str) -> Result<String> {
        if !matches!(self.state, State::Fresh) {
            return Err(Error::UnexpectedMessage);
        }

        let Envelope::Offer(payload) = Envelope::decode(offer)? else {
            return Err(Error::UnexpectedMessage);
        };

        let peer_identity =
            VerifyingKey::from_bytes(&payload.id_key).map_err(|_| Error::Malformed)?;
        if !(self.verify_peer)(&peer_identity) {
            return Err(Error::PeerRejected);
        }

        let spk_pub = PublicKey::from_bytes(payload.sp_key);
        let spk_sig = Signature::from_bytes(&payload.sp_sig);

        let handshake = x3dh::initiate(
            &mut self.rng,
            &self.identity,
            &peer_identity,
            &spk_pub,
            &spk_sig,
        )?;

        let mut ratchet = DoubleRatchet::new_active(
            &mut self.rng,
            handshake.shared_secret,
            handshake.associated_data,
            spk_pub,
        )?;

        let mut nonce = [0u8; INITIAL_PAYLOAD_LEN];
        self.rng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| Error::EntropyFailure)?;
        let cipher = ratchet.encrypt(&mut self.rng, &nonce)?;
        nonce.zeroize();

        let encoded = Envelope::Ack(AckPayload {
            id_key: self.identity.verifying_key().to_bytes(),
            e_key: *handshake.ephemeral_public.as_bytes(),
            cipher,
        })
        .encode();

        self.state = State::Established(Box::new(ratchet));
        Ok(encoded)
    }

    /// Process an incoming message of any kind.
    ///
    /// On error the session state is unchanged; in particular a tampered
    /// data message neither advances the ratchet nor consumes cached keys.
    ///
    /// # Errors
    /// [`Error::Malformed`] for undecodable input,
    /// [`Error::UnexpectedMessage`] if the message does not fit the current
    /// state, and the handshake or ratchet errors of the underlying layers.
    pub fn receive(&mut self, message: &str) -> Result<Received> {
        match Envelope::decode(message)? {
            Envelope::Offer(_) => Err(Error::UnexpectedMessage),
            Envelope::Ack(ack) => self.receive_ack(&ack),
            Envelope::Data(cipher) => self.receive_data(&cipher),
            Envelope::Close => {
                self.state = State::Closed;
                Ok(Received::Closed)
            }
        }
    }

    /// Encrypt a payload for the peer.
    ///
    /// # Errors
    /// [`Error::UnexpectedMessage`] unless the session is established.
    pub fn send(&mut self, plaintext: &[u8]) -> Result<String> {
        let State::Established(ratchet) = &mut self.state else {
            return Err(Error::UnexpectedMessage);
        };

        let cipher = ratchet.encrypt(&mut self.rng, plaintext)?;
        Ok(Envelope::Data(cipher).encode())
    }

    /// Close the session and produce the close message for the peer.
    ///
    /// All ratchet and pre-key material is zeroized. The session is
    /// terminal afterwards; only more `close` calls succeed.
    pub fn close(&mut self) -> Result<String> {
        self.state = State::Closed;
        Ok(Envelope::Close.encode())
    }

    fn receive_ack(&mut self, ack: &AckPayload) -> Result<Received> {
        let spk = match &self.state {
            State::OfferSent(spk) => spk.clone(),
            _ => return Err(Error::UnexpectedMessage),
        };

        let peer_identity =
            VerifyingKey::from_bytes(&ack.id_key).map_err(|_| Error::Malformed)?;
        if !(self.verify_peer)(&peer_identity) {
            return Err(Error::PeerRejected);
        }

        let ephemeral = PublicKey::from_bytes(ack.e_key);
        let handshake = x3dh::respond(&self.identity, &peer_identity, &spk, &ephemeral);

        let mut ratchet = DoubleRatchet::new_passive(
            handshake.shared_secret,
            handshake.associated_data,
            spk.secret().clone(),
        );

        // The ack's throwaway payload must decrypt; this proves both sides
        // derived the same session secret. The plaintext is discarded.
        ratchet.decrypt(&mut self.rng, &ack.cipher)?;

        self.state = State::Established(Box::new(ratchet));
        Ok(Received::Established)
    }

    fn receive_data(&mut self, cipher: &[u8]) -> Result<Received> {
        let State::Established(ratchet) = &mut self.state else {
            return Err(Error::UnexpectedMessage);
        };

        let plaintext = ratchet.decrypt(&mut self.rng, cipher)?;
        Ok(Received::Data(plaintext))
    }
}

impl<R, F> std::fmt::Debug for Session<R, F>
where
    R: CryptoRngCore,
    F: Fn(&VerifyingKey) -> bool,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Fresh => "Fresh",
            State::OfferSent(_) => "OfferSent",
            State::Established(_) => "Established",
            State::Closed => "Closed",
        };
        f.debug_struct("Session").field("state", &state).finish()
    }
}

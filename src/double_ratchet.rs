//! Double Ratchet state machine for forward-secure message keys.
//!
//! Combines two ratchets. The DH ratchet rotates an X25519 key pair once
//! per round trip and feeds the shared secrets through the root KDF; the
//! symmetric chain ratchet advances one step per message in each direction.
//! Skipped message keys are cached in a bounded store so lost and reordered
//! messages within the skip window still decrypt.
//!
//! The party that answered the offer drives the first DH step (it encrypts
//! before it ever received a ratchet key); the offering party starts from
//! its signed pre-key pair and catches up on its first decryption.

use crate::aead;
use crate::crypto::{chain_kdf, root_kdf, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{DhOutput, PublicKey, SecretKey};
use crate::storage::SkippedKeyStore;

use rand_core::CryptoRngCore;
use zeroize::Zeroize;

/// Maximum number of message keys skipped in one receiving step
pub const MAX_SKIP_PER_STEP: u32 = 32;

/// Maximum number of distinct peer-DH chains with cached skipped keys
pub const MAX_CHAINS: usize = 8;

/// Length of the ratchet header preceding every ciphertext
pub const HEADER_LEN: usize = 40;

/// Ratchet header: DH public key and the two chain counters.
///
/// Wire layout is `dhPub(32) || prevNo(4, big-endian) || msgNo(4,
/// big-endian)`.
#[derive(Debug, Clone)]
pub struct Header {
    /// Sender's current DH ratchet public key
    pub dh_pub: PublicKey,
    /// Length of the sender's previous sending chain
    pub prev_no: u32,
    /// Message number within the current sending chain
    pub msg_no: u32,
}

impl Header {
    /// Serialize to the fixed wire layout
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..32].copy_from_slice(self.dh_pub.as_bytes());
        bytes[32..36].copy_from_slice(&self.prev_no.to_be_bytes());
        bytes[36..].copy_from_slice(&self.msg_no.to_be_bytes());
        bytes
    }

    /// Parse from the fixed wire layout.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] unless `bytes` is exactly
    /// [`HEADER_LEN`] long.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(Error::Malformed);
        }

        let dh_pub =
            PublicKey::from_bytes(bytes[..32].try_into().map_err(|_| Error::Malformed)?);
        let prev_no =
            u32::from_be_bytes(bytes[32..36].try_into().map_err(|_| Error::Malformed)?);
        let msg_no = u32::from_be_bytes(bytes[36..].try_into().map_err(|_| Error::Malformed)?);

        Ok(Self {
            dh_pub,
            prev_no,
            msg_no,
        })
    }
}

/// Which step behavior the DH ratchet performs next.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DhPhase {
    /// Active peer before its one-time initial step
    ActivePending,
    /// Regular stepping for both peers
    Ready,
}

/// The Diffie-Hellman half of the ratchet: owns the current key pair and
/// produces the raw DH secrets consumed by the root KDF.
#[derive(Clone)]
struct DhRatchet {
    secret: SecretKey,
    public: PublicKey,
    peer_public: Option<PublicKey>,
    phase: DhPhase,
}

/// Output of one DH ratchet step.
struct DhStep {
    send_dh: DhOutput,
    recv_dh: Option<DhOutput>,
}

impl DhRatchet {
    /// Active peer: remember the peer's public key, generate a fresh pair.
    fn active<R: CryptoRngCore>(rng: &mut R, peer_public: PublicKey) -> Result<Self> {
        let secret = SecretKey::generate(rng)?;
        Ok(Self {
            public: secret.public_key(),
            secret,
            peer_public: Some(peer_public),
            phase: DhPhase::ActivePending,
        })
    }

    /// Passive peer: start from an existing key pair.
    fn passive(secret: SecretKey) -> Self {
        Self {
            public: secret.public_key(),
            secret,
            peer_public: None,
            phase: DhPhase::Ready,
        }
    }

    /// Perform one ratchet step.
    ///
    /// The active peer's first step only closes the gap towards the stored
    /// peer key; `peer_public` is ignored and no receiving secret exists
    /// yet. Every later step first derives the receiving secret against the
    /// peer's new key, then rotates the own pair for the sending secret.
    fn step<R: CryptoRngCore>(&mut self, rng: &mut R, peer_public: &PublicKey) -> Result<DhStep> {
        if self.phase == DhPhase::ActivePending {
            let stored = self.peer_public.as_ref().ok_or(Error::InternalInvariant)?;
            let send_dh = self.secret.diffie_hellman(stored);
            self.phase = DhPhase::Ready;

            return Ok(DhStep {
                send_dh,
                recv_dh: None,
            });
        }

        let recv_dh = self.secret.diffie_hellman(peer_public);
        self.peer_public = Some(*peer_public);

        self.secret = SecretKey::generate(rng)?;
        self.public = self.secret.public_key();
        let send_dh = self.secret.diffie_hellman(peer_public);

        Ok(DhStep {
            send_dh,
            recv_dh: Some(recv_dh),
        })
    }
}

/// Double Ratchet state for one established session.
#[derive(Clone)]
pub struct DoubleRatchet {
    associated_data: Vec<u8>,

    dhr: DhRatchet,
    root_key: SymmetricKey,
    peer_dh_pub: Option<PublicKey>,

    chain_key_send: Option<SymmetricKey>,
    chain_key_recv: Option<SymmetricKey>,

    send_no: u32,
    recv_no: u32,
    prev_send_no: u32,

    skipped: SkippedKeyStore,
}

impl DoubleRatchet {
    /// Create the ratchet for the active peer, which encrypts first.
    ///
    /// `peer_dh_pub` is the peer's signed pre-key public key from the offer.
    ///
    /// # Errors
    /// Returns [`Error::EntropyFailure`] if the entropy source fails.
    pub fn new_active<R: CryptoRngCore>(
        rng: &mut R,
        session_secret: SymmetricKey,
        associated_data: Vec<u8>,
        peer_dh_pub: PublicKey,
    ) -> Result<Self> {
        Ok(Self {
            associated_data,
            dhr: DhRatchet::active(rng, peer_dh_pub)?,
            root_key: session_secret,
            peer_dh_pub: Some(peer_dh_pub),
            chain_key_send: None,
            chain_key_recv: None,
            send_no: 0,
            recv_no: 0,
            prev_send_no: 0,
            skipped: SkippedKeyStore::new(),
        })
    }

    /// Create the ratchet for the passive peer from its signed pre-key
    /// pair. The first incoming message triggers the catch-up DH step.
    #[must_use]
    pub fn new_passive(
        session_secret: SymmetricKey,
        associated_data: Vec<u8>,
        dh_secret: SecretKey,
    ) -> Self {
        Self {
            associated_data,
            dhr: DhRatchet::passive(dh_secret),
            root_key: session_secret,
            peer_dh_pub: None,
            chain_key_send: None,
            chain_key_recv: None,
            send_no: 0,
            recv_no: 0,
            prev_send_no: 0,
            skipped: SkippedKeyStore::new(),
        }
    }

    /// Number of skipped message keys currently cached.
    #[must_use]
    pub fn cached_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Encrypt a plaintext, prepending the ratchet header.
    ///
    /// # Errors
    /// Returns [`Error::EntropyFailure`] if a DH step cannot generate a
    /// key pair, or [`Error::InternalInvariant`] on counter overflow.
    pub fn encrypt<R: CryptoRngCore>(&mut self, rng: &mut R, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.chain_key_send.is_none() {
            self.dh_step(rng)?;
        }

        let chain_key = self.chain_key_send.take().ok_or(Error::InternalInvariant)?;
        let (next_chain_key, message_key) = chain_kdf(&chain_key);
        self.chain_key_send = Some(next_chain_key);

        let header = Header {
            dh_pub: self.dhr.public,
            prev_no: self.prev_send_no,
            msg_no: self.send_no,
        };
        self.send_no = self.send_no.checked_add(1).ok_or(Error::InternalInvariant)?;

        let body = aead::encrypt(&message_key, plaintext, &self.associated_data)?;

        let mut ciphertext = Vec::with_capacity(HEADER_LEN + body.len());
        ciphertext.extend_from_slice(&header.to_bytes());
        ciphertext.extend_from_slice(&body);
        Ok(ciphertext)
    }

    /// Decrypt a ciphertext produced by the peer's [`encrypt`].
    ///
    /// Decryption is atomic: on any error the ratchet state is left exactly
    /// as it was, so a tampered message cannot advance chains or consume
    /// cached keys.
    ///
    /// [`encrypt`]: Self::encrypt
    ///
    /// # Errors
    /// [`Error::Malformed`] for truncated input, [`Error::SkipOverflow`] or
    /// [`Error::UnknownSkipped`] for gaps outside the skip window, and
    /// [`Error::MacMismatch`] or [`Error::BadPadding`] for data that fails
    /// authentication.
    pub fn decrypt<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let mut trial = self.clone();
        let plaintext = trial.decrypt_inner(rng, ciphertext)?;
        *self = trial;
        Ok(plaintext)
    }

    fn decrypt_inner<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        if ciphertext.len() < HEADER_LEN + aead::BLOCK_SIZE + aead::TAG_SIZE {
            return Err(Error::Malformed);
        }

        let header = Header::parse(&ciphertext[..HEADER_LEN])?;
        let body = &ciphertext[HEADER_LEN..];

        // A message from a chain that was already ratcheted past can only
        // be served from the cache.
        if let Some(message_key) = self.skipped.take(&header.dh_pub, header.msg_no) {
            return aead::decrypt(&message_key, body, &self.associated_data);
        }

        let same_chain = self
            .peer_dh_pub
            .as_ref()
            .is_some_and(|peer| header.dh_pub.ct_eq(peer));
        if !same_chain {
            self.skip_message_keys(header.prev_no)?;
            self.peer_dh_pub = Some(header.dh_pub);
            self.dh_step(rng)?;
        }

        if header.msg_no < self.recv_no {
            // Not cached, so the key was never derived or already consumed.
            return Err(Error::UnknownSkipped);
        }
        if header.msg_no > self.recv_no {
            self.skip_message_keys(header.msg_no)?;
        }

        let chain_key = self.chain_key_recv.take().ok_or(Error::InternalInvariant)?;
        let (next_chain_key, message_key) = chain_kdf(&chain_key);
        self.chain_key_recv = Some(next_chain_key);
        self.recv_no = self.recv_no.checked_add(1).ok_or(Error::InternalInvariant)?;

        aead::decrypt(&message_key, body, &self.associated_data)
    }

    /// Advance counters and rekey both chains off the evolving root.
    fn dh_step<R: CryptoRngCore>(&mut self, rng: &mut R) -> Result<()> {
        self.prev_send_no = self.send_no;
        self.send_no = 0;
        self.recv_no = 0;

        let peer = self.peer_dh_pub.ok_or(Error::InternalInvariant)?;
        let step = self.dhr.step(rng, &peer)?;

        if let Some(recv_dh) = step.recv_dh {
            let (root_key, chain_key) = root_kdf(&self.root_key, &recv_dh);
            self.root_key = root_key;
            self.chain_key_recv = Some(chain_key);
        }

        let (root_key, chain_key) = root_kdf(&self.root_key, &step.send_dh);
        self.root_key = root_key;
        self.chain_key_send = Some(chain_key);

        Ok(())
    }

    /// Derive and cache message keys up to (excluding) `until` on the
    /// current receiving chain.
    fn skip_message_keys(&mut self, until: u32) -> Result<()> {
        if until > self.recv_no && until - self.recv_no > MAX_SKIP_PER_STEP {
            return Err(Error::SkipOverflow);
        }

        // No receiving chain exists before the first complete exchange.
        let Some(mut chain_key) = self.chain_key_recv.take() else {
            return Ok(());
        };
        let Some(peer) = self.peer_dh_pub else {
            self.chain_key_recv = Some(chain_key);
            return Err(Error::InternalInvariant);
        };

        while self.recv_no < until {
            let (next_chain_key, message_key) = chain_kdf(&chain_key);
            self.skipped.insert(peer, self.recv_no, message_key);
            chain_key = next_chain_key;
            self.recv_no += 1;
        }

        self.chain_key_recv = Some(chain_key);
        Ok(())
    }
}

impl std::fmt::Debug for DoubleRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleRatchet")
            .field("send_no", &self.send_no)
            .field("recv_no", &self.recv_no)
            .field("prev_send_no", &self.prev_send_no)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl Zeroize for DoubleRatchet {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        self.chain_key_send.zeroize();
        self.chain_key_recv.zeroize();
        self.dhr.secret.zeroize();
        self.skipped.zeroize();
    }
}

impl Drop for DoubleRatchet {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_SIZE;
    use rand_core::OsRng;

    fn ratchet_pair() -> (DoubleRatchet, DoubleRatchet) {
        let spk = SecretKey::generate(&mut OsRng).unwrap();
        let session_secret = SymmetricKey::from_bytes([9u8; KEY_SIZE]);
        let associated_data = vec![1u8; 64];

        let active = DoubleRatchet::new_active(
            &mut OsRng,
            session_secret.clone(),
            associated_data.clone(),
            spk.public_key(),
        )
        .unwrap();
        let passive = DoubleRatchet::new_passive(session_secret, associated_data, spk);

        (active, passive)
    }

    #[test]
    fn test_basic_exchange() {
        let (mut active, mut passive) = ratchet_pair();

        let ciphertext = active.encrypt(&mut OsRng, b"hello there").unwrap();
        let plaintext = passive.decrypt(&mut OsRng, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello there");

        let reply = passive.encrypt(&mut OsRng, b"general kenobi").unwrap();
        let plaintext = active.decrypt(&mut OsRng, &reply).unwrap();
        assert_eq!(plaintext, b"general kenobi");
    }

    #[test]
    fn test_ping_pong_steps_ratchet() {
        let (mut active, mut passive) = ratchet_pair();

        for i in 0..10u8 {
            let (sender, receiver) = if i % 2 == 0 {
                (&mut active, &mut passive)
            } else {
                (&mut passive, &mut active)
            };

            let message = vec![i; 17];
            let ciphertext = sender.encrypt(&mut OsRng, &message).unwrap();
            let plaintext = receiver.decrypt(&mut OsRng, &ciphertext).unwrap();
            assert_eq!(plaintext, message);
        }
    }

    #[test]
    fn test_out_of_order_within_chain() {
        let (mut active, mut passive) = ratchet_pair();

        let c1 = active.encrypt(&mut OsRng, b"one").unwrap();
        let c2 = active.encrypt(&mut OsRng, b"two").unwrap();
        let c3 = active.encrypt(&mut OsRng, b"three").unwrap();

        assert_eq!(passive.decrypt(&mut OsRng, &c3).unwrap(), b"three");
        assert_eq!(passive.decrypt(&mut OsRng, &c1).unwrap(), b"one");
        assert_eq!(passive.decrypt(&mut OsRng, &c2).unwrap(), b"two");
        assert_eq!(passive.cached_key_count(), 0);
    }

    #[test]
    fn test_straggler_across_dh_step() {
        let (mut active, mut passive) = ratchet_pair();

        let old = active.encrypt(&mut OsRng, b"late").unwrap();
        let fresh = active.encrypt(&mut OsRng, b"fresh").unwrap();

        assert_eq!(passive.decrypt(&mut OsRng, &fresh).unwrap(), b"fresh");

        // A full round trip later the old chain is gone; the cached key
        // still decrypts the straggler.
        let reply = passive.encrypt(&mut OsRng, b"reply").unwrap();
        assert_eq!(active.decrypt(&mut OsRng, &reply).unwrap(), b"reply");
        let next = active.encrypt(&mut OsRng, b"next").unwrap();
        assert_eq!(passive.decrypt(&mut OsRng, &next).unwrap(), b"next");

        assert_eq!(passive.decrypt(&mut OsRng, &old).unwrap(), b"late");
        assert_eq!(passive.cached_key_count(), 0);
    }

    #[test]
    fn test_skip_overflow() {
        let (mut active, mut passive) = ratchet_pair();

        // Establish the receiving chain first.
        let c = active.encrypt(&mut OsRng, b"start").unwrap();
        passive.decrypt(&mut OsRng, &c).unwrap();

        let mut last = Vec::new();
        for _ in 0..MAX_SKIP_PER_STEP + 2 {
            last = active.encrypt(&mut OsRng, b"dropped").unwrap();
        }

        assert_eq!(
            passive.decrypt(&mut OsRng, &last),
            Err(Error::SkipOverflow)
        );
    }

    #[test]
    fn test_replay_is_rejected() {
        let (mut active, mut passive) = ratchet_pair();

        let c = active.encrypt(&mut OsRng, b"once").unwrap();
        passive.decrypt(&mut OsRng, &c).unwrap();

        assert_eq!(passive.decrypt(&mut OsRng, &c), Err(Error::UnknownSkipped));
    }

    #[test]
    fn test_tamper_leaves_state_unchanged() {
        let (mut active, mut passive) = ratchet_pair();

        let good = active.encrypt(&mut OsRng, b"first").unwrap();
        passive.decrypt(&mut OsRng, &good).unwrap();

        let mut tampered = active.encrypt(&mut OsRng, b"second").unwrap();
        let len = tampered.len();
        tampered[len - 1] ^= 0x80;

        let before = format!("{passive:?}");
        assert!(passive.decrypt(&mut OsRng, &tampered).is_err());
        assert_eq!(format!("{passive:?}"), before);

        // The untampered original still decrypts.
        let good = active.encrypt(&mut OsRng, b"third").unwrap();
        assert_eq!(passive.decrypt(&mut OsRng, &good).unwrap(), b"third");
    }

    #[test]
    fn test_truncated_ciphertext() {
        let (mut active, mut passive) = ratchet_pair();

        let c = active.encrypt(&mut OsRng, b"short").unwrap();
        assert_eq!(
            passive.decrypt(&mut OsRng, &c[..HEADER_LEN]),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn test_header_roundtrip() {
        let header = Header {
            dh_pub: PublicKey::from_bytes([0xAB; 32]),
            prev_no: 65_536,
            msg_no: u32::MAX,
        };

        let parsed = Header::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed.dh_pub, header.dh_pub);
        assert_eq!(parsed.prev_no, header.prev_no);
        assert_eq!(parsed.msg_no, header.msg_no);

        assert!(Header::parse(&[0u8; 39]).is_err());
        assert!(Header::parse(&[0u8; 41]).is_err());
    }
}

//! Bounded storage for out-of-order message keys.
//!
//! Keys are grouped per sending chain, identified by the peer's DH ratchet
//! public key. Chains are evicted whole, oldest first, once more than
//! [`MAX_CHAINS`] distinct chains hold cached keys. Within one chain the
//! number of cached keys never exceeds the per-step skip limit, so the
//! store holds at most `MAX_CHAINS * MAX_SKIP_PER_STEP` keys in total.

use crate::crypto::SymmetricKey;
use crate::double_ratchet::{MAX_CHAINS, MAX_SKIP_PER_STEP};
use crate::keys::PublicKey;

use std::collections::{HashMap, VecDeque};
use zeroize::Zeroize;

/// Cache of message keys for messages that have not arrived yet.
#[derive(Clone, Default)]
pub(crate) struct SkippedKeyStore {
    chains: VecDeque<ChainEntry>,
}

#[derive(Clone)]
struct ChainEntry {
    dh_pub: PublicKey,
    keys: HashMap<u32, SymmetricKey>,
}

impl SkippedKeyStore {
    pub(crate) fn new() -> Self {
        Self {
            chains: VecDeque::new(),
        }
    }

    /// Cache a message key under (peer DH public, message number).
    pub(crate) fn insert(&mut self, dh_pub: PublicKey, msg_no: u32, key: SymmetricKey) {
        if let Some(entry) = self.chains.iter_mut().find(|e| e.dh_pub == dh_pub) {
            if entry.keys.len() >= MAX_SKIP_PER_STEP as usize
                && !entry.keys.contains_key(&msg_no)
            {
                if let Some(&lowest) = entry.keys.keys().min() {
                    entry.keys.remove(&lowest);
                }
            }
            entry.keys.insert(msg_no, key);
            return;
        }

        if self.chains.len() >= MAX_CHAINS {
            self.chains.pop_front();
        }

        let mut keys = HashMap::new();
        keys.insert(msg_no, key);
        self.chains.push_back(ChainEntry { dh_pub, keys });
    }

    /// Remove and return the cached key, if present.
    pub(crate) fn take(&mut self, dh_pub: &PublicKey, msg_no: u32) -> Option<SymmetricKey> {
        self.chains
            .iter_mut()
            .find(|e| e.dh_pub == *dh_pub)?
            .keys
            .remove(&msg_no)
    }

    /// Number of keys currently cached across all chains.
    pub(crate) fn len(&self) -> usize {
        self.chains.iter().map(|e| e.keys.len()).sum()
    }
}

impl Zeroize for SkippedKeyStore {
    fn zeroize(&mut self) {
        // Dropping the entries zeroizes the contained keys.
        self.chains.clear();
    }
}

impl std::fmt::Debug for SkippedKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedKeyStore")
            .field("chains", &self.chains.len())
            .field("keys", &self.len())
            .finish()
    }
}

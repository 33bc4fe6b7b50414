//! # End-to-end encrypted two-party sessions
//!
//! Establishes an authenticated, forward-secret channel between two peers
//! who already know each other's long-term Ed25519 identity public keys,
//! using the X3DH key agreement and the Double Ratchet algorithm. Messages
//! travel as printable ASCII strings over any transport the caller
//! provides; the ratchet tolerates loss and reordering within a bounded
//! window.
//!
//! ## Security properties
//!
//! - **Forward secrecy**: past messages stay secure if current keys leak
//! - **Post-compromise security**: a completed round trip after a key
//!   compromise restores security
//! - **Peer authentication**: the handshake binds both identity keys; a
//!   caller-supplied callback decides whether a peer key is trusted
//!
//! ## Protocol flow
//!
//! Unlike a pre-key directory deployment, both parties are online: the
//! opening party generates the signed pre-key inside its offer, and its
//! peer answers immediately with an ephemeral key, so the handshake is
//! synchronous.
//!
//! ## Usage
//!
//! ```
//! use ed25519_dalek::{SigningKey, VerifyingKey};
//! use rand_core::OsRng;
//! use ratchet_session::{Received, Session};
//!
//! let alice_identity = SigningKey::generate(&mut OsRng);
//! let bob_identity = SigningKey::generate(&mut OsRng);
//! let alice_public = alice_identity.verifying_key();
//! let bob_public = bob_identity.verifying_key();
//!
//! let mut alice = Session::new(
//!     alice_identity,
//!     move |peer: &VerifyingKey| *peer == bob_public,
//!     OsRng,
//! );
//! let mut bob = Session::new(
//!     bob_identity,
//!     move |peer: &VerifyingKey| *peer == alice_public,
//!     OsRng,
//! );
//!
//! let offer = alice.offer()?;
//! let ack = bob.acknowledge(&offer)?;
//! assert_eq!(alice.receive(&ack)?, Received::Established);
//!
//! let message = alice.send(b"hello bob")?;
//! assert_eq!(bob.receive(&message)?, Received::Data(b"hello bob".to_vec()));
//!
//! let close = alice.close()?;
//! assert_eq!(bob.receive(&close)?, Received::Closed);
//! # Ok::<(), ratchet_session::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]

pub mod crypto;
pub mod double_ratchet;
pub mod error;
pub mod keys;
pub mod session;
pub mod x3dh;

mod aead;
mod message;
mod storage;

pub use double_ratchet::{DoubleRatchet, Header};
pub use error::{Error, Result};
pub use session::{Received, Session};
pub use x3dh::SignedPreKey;

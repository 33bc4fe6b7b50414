//! Fuzz target for the session ingress path
//!
//! Feeds arbitrary strings into a fresh session's receive method, covering
//! envelope decoding, tag dispatch and body validation end to end.

#![no_main]

use ed25519_dalek::{SigningKey, VerifyingKey};
use libfuzzer_sys::fuzz_target;
use rand_core::OsRng;
use ratchet_session::Session;

fuzz_target!(|input: &str| {
    let identity = SigningKey::generate(&mut OsRng);
    let mut session = Session::new(identity, |_: &VerifyingKey| true, OsRng);

    let _ = session.receive(input);
});

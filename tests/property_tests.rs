//! Property-based tests over established sessions.
//!
//! Uses proptest to check the protocol laws across random payloads,
//! delivery permutations and loss patterns.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};
use proptest::prelude::*;
use rand_core::OsRng;
use ratchet_session::double_ratchet::MAX_SKIP_PER_STEP;
use ratchet_session::{Error, Received, Session};

type TestSession = Session<OsRng, Box<dyn Fn(&VerifyingKey) -> bool>>;

fn established_pair() -> (TestSession, TestSession) {
    let alice_identity = SigningKey::generate(&mut OsRng);
    let bob_identity = SigningKey::generate(&mut OsRng);

    let alice_public = alice_identity.verifying_key();
    let bob_public = bob_identity.verifying_key();

    let mut alice: TestSession = Session::new(
        alice_identity,
        Box::new(move |peer: &VerifyingKey| *peer == bob_public),
        OsRng,
    );
    let mut bob: TestSession = Session::new(
        bob_identity,
        Box::new(move |peer: &VerifyingKey| *peer == alice_public),
        OsRng,
    );

    let offer = alice.offer().expect("offer should succeed");
    let ack = bob.acknowledge(&offer).expect("acknowledge should succeed");
    alice.receive(&ack).expect("handshake should complete");

    (alice, bob)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_roundtrip_any_payload(message in prop::collection::vec(any::<u8>(), 0..1000)) {
        let (mut alice, mut bob) = established_pair();

        let wire = alice.send(&message).unwrap();
        prop_assert_eq!(bob.receive(&wire).unwrap(), Received::Data(message));
    }

    #[test]
    fn prop_any_permutation_decrypts(
        order in Just((0..16usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let (mut alice, mut bob) = established_pair();

        let wires: Vec<String> = (0..16)
            .map(|i| alice.send(format!("message {i}").as_bytes()).unwrap())
            .collect();

        for &i in &order {
            prop_assert_eq!(
                bob.receive(&wires[i]).unwrap(),
                Received::Data(format!("message {i}").into_bytes())
            );
        }
    }

    #[test]
    fn prop_losses_within_window_tolerated(
        gaps in prop::collection::vec(0..MAX_SKIP_PER_STEP, 1..8),
    ) {
        let (mut alice, mut bob) = established_pair();

        for (round, gap) in gaps.iter().enumerate() {
            for _ in 0..*gap {
                alice.send(b"lost in transit").unwrap();
            }

            let payload = format!("round {round}");
            let wire = alice.send(payload.as_bytes()).unwrap();
            prop_assert_eq!(
                bob.receive(&wire).unwrap(),
                Received::Data(payload.into_bytes())
            );
        }
    }

    #[test]
    fn prop_tag_bitflip_detected(byte in 0usize..32, bit in 0u8..8) {
        let (mut alice, mut bob) = established_pair();

        let wire = alice.send(b"tamper target").unwrap();

        let inner = wire
            .strip_prefix("!XO!")
            .and_then(|rest| rest.strip_suffix("!OX!"))
            .unwrap();
        let mut body = BASE64.decode(&inner.as_bytes()[1..]).unwrap();

        let index = body.len() - 32 + byte;
        body[index] ^= 1 << bit;
        let forged = format!("!XO!3{}!OX!", BASE64.encode(&body));

        prop_assert_eq!(bob.receive(&forged), Err(Error::MacMismatch));

        // The state rolled back, so the genuine message still decrypts.
        prop_assert_eq!(
            bob.receive(&wire).unwrap(),
            Received::Data(b"tamper target".to_vec())
        );
    }

    #[test]
    fn prop_receive_arbitrary_input_never_panics(input in ".*") {
        let identity = SigningKey::generate(&mut OsRng);
        let mut session: TestSession =
            Session::new(identity, Box::new(|_: &VerifyingKey| true), OsRng);

        let _ = session.receive(&input);
    }
}

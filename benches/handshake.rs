use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use ratchet_session::Session;

type BenchSession = Session<OsRng, Box<dyn Fn(&VerifyingKey) -> bool>>;

fn session_pair() -> (BenchSession, BenchSession) {
    let alice_identity = SigningKey::generate(&mut OsRng);
    let bob_identity = SigningKey::generate(&mut OsRng);

    let alice_public = alice_identity.verifying_key();
    let bob_public = bob_identity.verifying_key();

    let alice: BenchSession = Session::new(
        alice_identity,
        Box::new(move |peer: &VerifyingKey| *peer == bob_public),
        OsRng,
    );
    let bob: BenchSession = Session::new(
        bob_identity,
        Box::new(move |peer: &VerifyingKey| *peer == alice_public),
        OsRng,
    );

    (alice, bob)
}

fn bench_offer(c: &mut Criterion) {
    c.bench_function("offer", |b| {
        b.iter(|| {
            let (mut alice, _) = session_pair();
            black_box(alice.offer().unwrap())
        });
    });
}

fn bench_full_handshake(c: &mut Criterion) {
    c.bench_function("offer_acknowledge_receive", |b| {
        b.iter(|| {
            let (mut alice, mut bob) = session_pair();

            let offer = alice.offer().unwrap();
            let ack = bob.acknowledge(&offer).unwrap();
            black_box(alice.receive(&ack).unwrap())
        });
    });
}

criterion_group!(benches, bench_offer, bench_full_handshake);
criterion_main!(benches);

//! Fuzz target for ratchet header parsing
//!
//! Arbitrary bytes must never cause a panic, and every parsed header must
//! survive a serialization roundtrip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::Header;

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = Header::parse(data) {
        let serialized = header.to_bytes();
        let roundtrip = Header::parse(&serialized).expect("roundtrip should succeed");

        assert_eq!(header.dh_pub, roundtrip.dh_pub);
        assert_eq!(header.prev_no, roundtrip.prev_no);
        assert_eq!(header.msg_no, roundtrip.msg_no);
    }
});

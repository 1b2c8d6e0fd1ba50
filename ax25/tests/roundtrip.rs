use ax25::packet::{Packet, SOURCE};

/// Build-from-text, pack, and reparse a spread of valid frames; the result
/// must be structurally identical each way around.
#[test]
fn test_frame_round_trip() {
    let samples = [
        "W1ABC>TEST01:",
        "W1ABC>TEST-3:",
        "N0CALL-5>APRS,WIDE1-1,WIDE2-2:>status",
        "WB2OSZ-15>TEST,W1AB*,WIDE2-1:!4237.14N/07120.83W-PHG7140",
        "K1XYZ>BEACON,R1,R2,R3,R4,R5,R6,R7,R8:eight hops",
    ];
    for s in samples {
        let p = Packet::from_text(s, true).unwrap();
        let mut bytes = Vec::new();
        p.pack(&mut bytes);
        let q = Packet::from_frame(&bytes, None).unwrap();
        assert_eq!(p, q, "frame round trip failed for {s}");
        let rendered = format!("{}{}", q.format_addrs(), String::from_utf8_lossy(q.info()));
        assert_eq!(rendered, s);
    }
}

#[test]
fn test_insert_remove_identity_across_positions() {
    let p = Packet::from_text("W1ABC>TEST,R1,R2,R3:payload", true).unwrap();
    for n in 2..=p.num_addr() {
        let mut q = p.dup();
        q.insert_addr(n, "WB2OSZ-9");
        q.remove_addr(n);
        assert_eq!(p, q, "insert/remove at {n} was not an identity");
    }
}

#[test]
fn test_heard_follows_h_bits() {
    let p = Packet::from_text("W1ABC>TEST,R1,R2,R3:x", true).unwrap();
    assert_eq!(p.heard(), SOURCE);

    let p = Packet::from_text("W1ABC>TEST,R1*,R2,R3:x", true).unwrap();
    assert_eq!(p.heard(), 2);

    let mut p = Packet::from_text("W1ABC>TEST,R1*,R2,R3:x", true).unwrap();
    p.set_h(4);
    assert_eq!(p.heard(), 4);
}

//! Byte-level checks of the DNS codec and the frame layout

use http_over_dns::dns::{CLASS_IN, RCODE_FORMERR, TYPE_TXT};
use http_over_dns::frame::{decode_id, encode_id};
use http_over_dns::{
    decode_hostname, encode_hostname, CapacityPlanner, Command, FrameCodec, Header, Message,
    Question, ResourceRecord, TunnelError, TunnelFrame, MAX_MESSAGE_SIZE,
};
use std::sync::Arc;

#[test]
fn test_hostname_bytes() {
    let encoded = encode_hostname("testname.com").unwrap();
    assert_eq!(encoded, b"\x08testname\x03com\x00");

    let (name, next) = decode_hostname(&encoded, 0).unwrap();
    assert_eq!(name, "testname.com");
    assert_eq!(next, encoded.len());
}

#[test]
fn test_header_bytes() {
    let header = Header {
        id: 0x0052,
        qdcount: 1,
        ..Header::default()
    };
    assert_eq!(
        header.encode().unwrap(),
        vec![0x00, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
    );

    let response = Header {
        id: 0xbeef,
        qr: true,
        opcode: 2,
        aa: true,
        tc: false,
        rd: true,
        ra: true,
        rcode: 3,
        ..Header::default()
    };
    let bytes = response.encode().unwrap();
    // qr | opcode 2 | aa | rd
    assert_eq!(bytes[2], 0b1001_0101);
    // ra | rcode 3
    assert_eq!(bytes[3], 0b1000_0011);
    assert_eq!(Header::decode(&bytes, 0).unwrap(), (response, 12));
}

#[test]
fn test_question_bytes() {
    let question = Question::txt("a.bc");
    let bytes = question.encode().unwrap();
    assert_eq!(bytes, b"\x01a\x02bc\x00\x00\x10\x00\x01");

    let (decoded, next) = Question::decode(&bytes, 0).unwrap();
    assert_eq!(decoded.qtype, TYPE_TXT);
    assert_eq!(decoded.qclass, CLASS_IN);
    assert_eq!(next, bytes.len());
}

#[test]
fn test_record_bytes() {
    let record = ResourceRecord::txt("x", 0x01020304, b"hi".to_vec());
    let bytes = record.encode().unwrap();
    assert_eq!(
        bytes,
        b"\x01x\x00\x00\x10\x00\x01\x01\x02\x03\x04\x00\x02hi".to_vec()
    );
    assert_eq!(record.rdlength(), 2);
}

#[test]
fn test_message_sections_roundtrip() {
    let message = Message::new(
        Header::query(7),
        vec![Question::txt("q.example")],
        vec![ResourceRecord::txt("an.example", 1, b"answer".to_vec())],
        vec![
            ResourceRecord::txt("ns1.example", 2, Vec::new()),
            ResourceRecord::txt("ns2.example", 2, b"x".to_vec()),
        ],
        vec![ResourceRecord::new("ar.example", 1, CLASS_IN, 3, vec![127, 0, 0, 1])],
    )
    .unwrap();

    let header = message.header();
    assert_eq!(
        (header.qdcount, header.ancount, header.nscount, header.arcount),
        (1, 1, 2, 1)
    );

    let bytes = message.encode().unwrap();
    let (decoded, next) = Message::decode(&bytes, 0).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(next, bytes.len());
}

#[test]
fn test_truncated_message_is_an_error() {
    let message = Message::query(1, Question::txt("AA000000.R.AA000000.t.example.com"));
    let bytes = message.encode().unwrap();

    for cut in 0..bytes.len() {
        let err = Message::decode(&bytes[..cut], 0).unwrap_err();
        assert!(err.is_decoding(), "cut at {} gave {:?}", cut, err);
    }
}

#[test]
fn test_id_label_examples() {
    assert_eq!(encode_id(0), "AA000000");
    assert_eq!(encode_id(1), "AE000000");
    assert_eq!(encode_id(2), "AI000000");
    assert_eq!(encode_id(255), "74000000");
    assert_eq!(decode_id("74000000").unwrap(), 255);
    assert_eq!(decode_id("ae000000").unwrap(), 1);
}

#[test]
fn test_frame_wire_layout() {
    let planner = Arc::new(CapacityPlanner::with_domain("t.example.com").unwrap());
    let codec = FrameCodec::new(planner);

    let frame = TunnelFrame::new(1, Command::SendLast, 2, b"hi".to_vec());
    let query = codec.to_query(&frame, 0x4242).unwrap();
    // "hi" in unpadded base32
    assert_eq!(
        query.questions()[0].qname,
        "NBUQ.AE000000.L.AI000000.t.example.com"
    );

    let retrieve = codec.to_query(&TunnelFrame::retrieve(1, 0), 1).unwrap();
    let downlink = TunnelFrame::new(1, Command::SendMore, 0, b"data".to_vec());
    let response = codec.to_response(&retrieve, Some(&downlink)).unwrap();
    let answer = &response.answers()[0];
    assert_eq!(answer.name, "AE000000.S.AA000000.t.example.com");
    assert_eq!(answer.rtype, TYPE_TXT);
    assert_eq!(answer.ttl, 0);
    assert_eq!(answer.rdata, b"data");
}

#[test]
fn test_every_frame_fits_the_message_limit() {
    for domain in ["", "t.example.com", "a-much-longer-tunnel-domain.example.org"] {
        let planner = Arc::new(CapacityPlanner::with_domain(domain).unwrap());
        let codec = FrameCodec::new(planner.clone());

        let up = TunnelFrame::new(255, Command::SendMore, 255, vec![0xff; planner.uplink_capacity()]);
        let query = codec.to_query(&up, u16::MAX).unwrap();
        assert!(query.encode().unwrap().len() <= MAX_MESSAGE_SIZE, "uplink under {:?}", domain);

        let down = TunnelFrame::new(
            255,
            Command::SendLast,
            255,
            vec![0xff; planner.resource_record_capacity()],
        );
        let retrieve = codec.to_query(&TunnelFrame::retrieve(255, 255), 1).unwrap();
        let response = codec.to_response(&retrieve, Some(&down)).unwrap();
        assert!(response.encode().unwrap().len() <= MAX_MESSAGE_SIZE, "downlink under {:?}", domain);
    }
}

#[test]
fn test_error_response_for_garbage_query() {
    let planner = Arc::new(CapacityPlanner::with_domain("").unwrap());
    let codec = FrameCodec::new(planner);
    let query = Message::query(3, Question::txt("www.example.com"));

    assert!(matches!(
        codec.from_query(&query),
        Err(TunnelError::MalformedFrame(_))
    ));
    let response = codec.error_response(&query, RCODE_FORMERR).unwrap();
    assert_eq!(response.header().rcode, RCODE_FORMERR);
    assert!(response.header().is_response());
}

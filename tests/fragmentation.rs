//! Split emission and reassembly across the send and receive queues.

use std::sync::atomic::AtomicU16;
use std::sync::Arc;

use highrak::connection::queue::{RecvQueue, SendQueue};
use highrak::protocol::frame::FramePacket;
use highrak::protocol::io::ByteReader;
use highrak::Reliability;

fn send_queue(mtu: u16) -> SendQueue {
    SendQueue::new(Arc::new(AtomicU16::new(mtu)))
}

fn parse(datagram: &[u8]) -> FramePacket {
    let mut reader = ByteReader::new(datagram);
    assert_eq!(reader.read_u8().unwrap() & 0xf0, 0x80);
    FramePacket::read(&mut reader).unwrap()
}

#[test]
fn oversized_payload_round_trips_through_splits() {
    let payload: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();

    let mut sender = send_queue(1200);
    let datagrams = sender.send_payload(payload.clone(), Reliability::Reliable, 0);
    assert_eq!(datagrams.len(), 4, "ceil(4000 / (1200 - 34)) fragments");

    // one shared split id, message indexes M..M+3, split indexes 0..3
    let packets: Vec<FramePacket> = datagrams.iter().map(|d| parse(d)).collect();
    let first_meta = packets[0].frames[0].fragment_meta.clone().unwrap();
    for (i, pk) in packets.iter().enumerate() {
        let frame = &pk.frames[0];
        let meta = frame.fragment_meta.as_ref().unwrap();
        assert_eq!(meta.id, first_meta.id);
        assert_eq!(meta.size, 4);
        assert_eq!(meta.index, i as u32);
        assert_eq!(frame.reliable_index, Some(i as u32));
        assert!(pk.total_len() <= 1200);
    }

    // deliver the fragments in a scrambled order
    let mut receiver = RecvQueue::new();
    for i in [2usize, 0, 3, 1] {
        assert!(receiver.insert(packets[i].clone(), true));
    }

    let ready = receiver.flush_ready();
    assert_eq!(ready.len(), 1, "exactly one upward delivery");
    assert_eq!(ready[0].body, payload);
    assert_eq!(ready[0].reliability, Reliability::Reliable);
    assert!(!ready[0].is_fragmented());
}

#[test]
fn missing_fragments_never_deliver() {
    let mut sender = send_queue(1200);
    let datagrams = sender.send_payload(vec![3; 3000], Reliability::Reliable, 0);
    assert_eq!(datagrams.len(), 3);

    let mut receiver = RecvQueue::new();
    for datagram in datagrams.iter().take(2) {
        receiver.insert(parse(datagram), true);
    }
    assert!(receiver.flush_ready().is_empty());

    // the last fragment completes the payload
    receiver.insert(parse(&datagrams[2]), true);
    assert_eq!(receiver.flush_ready().len(), 1);
}

#[test]
fn small_payloads_stay_whole() {
    let mut sender = send_queue(1200);
    let datagrams = sender.send_payload(vec![0x8e, 1], Reliability::Reliable, 0);
    assert_eq!(datagrams.len(), 1);

    let pk = parse(&datagrams[0]);
    assert_eq!(pk.frames.len(), 1);
    assert!(pk.frames[0].fragment_meta.is_none());
    assert_eq!(pk.frames[0].body, vec![0x8e, 1]);
}

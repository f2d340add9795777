//! The acknowledgement payload shared by ACK (`0xc0`) and NACK (`0xa0`)
//! packets: a record count followed by single sequences and inclusive
//! ranges of 24-bit little-endian triads.

pub const ACK: u8 = 0xc0;
pub const NACK: u8 = 0xa0;

/// Decoded ranges are clamped to this many sequences past their start.
pub const MAX_ACK_RANGE: u32 = 512;
/// A single payload never decodes into more sequences than this.
pub const MAX_ACK_SEQUENCES: usize = 4096;

use super::io::{ByteReader, ByteWriter, CodecError};

/// An ack record. A record holds a single sequence or an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Single(u32),
    Range(u32, u32),
}

/// Coalesces sorted sequence numbers into maximal consecutive runs.
pub fn into_records(mut seqs: Vec<u32>) -> Vec<Record> {
    seqs.sort_unstable();
    seqs.dedup();

    let mut records = Vec::new();
    let mut iter = seqs.into_iter();
    let Some(first) = iter.next() else {
        return records;
    };

    let (mut start, mut last) = (first, first);
    for seq in iter {
        if seq == last + 1 {
            last = seq;
            continue;
        }
        records.push(if start == last {
            Record::Single(start)
        } else {
            Record::Range(start, last)
        });
        start = seq;
        last = seq;
    }
    records.push(if start == last {
        Record::Single(start)
    } else {
        Record::Range(start, last)
    });

    records
}

/// Encodes the sequence set as an acknowledgement payload (everything
/// after the ACK/NACK id byte).
pub fn encode_ack(seqs: Vec<u32>, buf: &mut ByteWriter) {
    let records = into_records(seqs);
    buf.write_u16(records.len() as u16);
    for record in records {
        match record {
            Record::Single(seq) => {
                buf.write_u8(1);
                buf.write_u24_le(seq);
            }
            Record::Range(start, last) => {
                buf.write_u8(0);
                buf.write_u24_le(start);
                buf.write_u24_le(last);
            }
        }
    }
}

/// Decodes an acknowledgement payload into individual sequence numbers.
///
/// Ranges wider than [`MAX_ACK_RANGE`] are clamped and the total is capped
/// at [`MAX_ACK_SEQUENCES`] so a hostile peer cannot balloon memory.
pub fn decode_ack(buf: &mut ByteReader) -> Result<Vec<u32>, CodecError> {
    let records = buf.read_u16()?;
    let mut seqs = Vec::new();

    for _ in 0..records {
        if buf.remaining() == 0 || seqs.len() >= MAX_ACK_SEQUENCES {
            break;
        }
        if buf.read_u8()? == 0 {
            let mut start = buf.read_u24_le()?;
            let mut last = buf.read_u24_le()?;
            if last < start {
                std::mem::swap(&mut start, &mut last);
            }
            if last - start > MAX_ACK_RANGE {
                last = start + MAX_ACK_RANGE;
            }
            for seq in start..=last {
                if seqs.len() >= MAX_ACK_SEQUENCES {
                    break;
                }
                seqs.push(seq);
            }
        } else {
            seqs.push(buf.read_u24_le()?);
        }
    }

    Ok(seqs)
}

//! Wire codec: TLV field parsing/serialization for [`Record`](crate::Record).
//!
//! Records are framed on the wire as a 2-byte start marker followed by a
//! sequence of `type:u16be, len:u16be, value:len bytes` fields. There is no
//! record-length prefix: the end of a record is detected structurally, by an
//! unrecognized or duplicate field type.

use crate::record::{Action, Record, Timestamp, DATA_CAP, DEV_TYPE_CAP, SERIAL_CAP};

/// 2-byte sequence preceding every framed record.
pub const START_MARKER: [u8; 2] = [0x5A, 0x5A];

const TLV_HEADER_SIZE: usize = 4;

const FIELD_ACTION: u16 = 1;
const FIELD_SERNUM: u16 = 2;
const FIELD_DEVTYPE: u16 = 3;
const FIELD_DATA: u16 = 4;
const FIELD_TIME: u16 = 5;

/// Outcome of decoding one record's TLV body.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A record was fully parsed, consuming this many bytes of the buffer.
    Record { record: Record, consumed: usize },
    /// The buffer doesn't yet hold a full record; caller must read more.
    Incomplete,
    /// A field violated a length/value constraint; the record is corrupt.
    Invalid,
}

#[derive(Default)]
struct SeenFields {
    action: bool,
    sernum: bool,
    devtype: bool,
    data: bool,
    time: bool,
}

/// Parse TLV fields from `buf` into a fresh [`Record`] until an unknown or
/// duplicate field type is hit, the buffer runs out, or validation fails.
///
/// On [`Decoded::Record`], `consumed` is how many bytes of `buf` belonged to
/// this record's TLV body (not including the 2-byte start marker, which the
/// caller is responsible for having already skipped).
pub fn deserialize(buf: &[u8]) -> Decoded {
    let mut record = Record::default();
    let mut seen = SeenFields::default();
    let mut processed = 0usize;

    loop {
        if processed + TLV_HEADER_SIZE > buf.len() {
            return Decoded::Incomplete;
        }

        let field_type = u16::from_be_bytes([buf[processed], buf[processed + 1]]);
        let len = u16::from_be_bytes([buf[processed + 2], buf[processed + 3]]) as usize;

        if processed + TLV_HEADER_SIZE + len > buf.len() {
            return Decoded::Incomplete;
        }

        let value = &buf[processed + TLV_HEADER_SIZE..processed + TLV_HEADER_SIZE + len];

        match field_type {
            FIELD_ACTION => {
                if seen.action {
                    return Decoded::Record { record, consumed: processed };
                }
                if len != 2 {
                    return Decoded::Invalid;
                }
                let raw = u16::from_be_bytes([value[0], value[1]]);
                record.action = Action::from_u16(raw);
                seen.action = true;
                if record.action == Action::Store {
                    record.timestamp = Timestamp::now();
                    seen.time = true;
                }
            }
            FIELD_SERNUM => {
                if seen.sernum {
                    return Decoded::Record { record, consumed: processed };
                }
                if len > SERIAL_CAP {
                    return Decoded::Invalid;
                }
                record.serial = value.iter().copied().collect();
                seen.sernum = true;
            }
            FIELD_DEVTYPE => {
                if seen.devtype {
                    return Decoded::Record { record, consumed: processed };
                }
                if len > DEV_TYPE_CAP {
                    return Decoded::Invalid;
                }
                record.dev_type = value.iter().copied().collect();
                seen.devtype = true;
            }
            FIELD_DATA => {
                if seen.data {
                    return Decoded::Record { record, consumed: processed };
                }
                if len > DATA_CAP {
                    return Decoded::Invalid;
                }
                record.data = value.iter().copied().collect();
                seen.data = true;
            }
            FIELD_TIME => {
                if seen.time {
                    return Decoded::Record { record, consumed: processed };
                }
                if len != 8 {
                    return Decoded::Invalid;
                }
                let sec = u32::from_be_bytes(value[0..4].try_into().unwrap());
                let usec = u32::from_be_bytes(value[4..8].try_into().unwrap());
                if usec >= 1_000_000 {
                    return Decoded::Invalid;
                }
                // STORE already stamped its own timestamp above; a client's
                // TIME field is never honored for STORE.
                if record.action != Action::Store {
                    record.timestamp = Timestamp { sec, usec };
                }
                seen.time = true;
            }
            _ => return Decoded::Record { record, consumed: processed },
        }

        processed += TLV_HEADER_SIZE + len;
    }
}

/// Serialize `rec` into `buf` as ACTION, SERNUM, DEVTYPE, DATA, TIME, in that
/// order. The emitted ACTION is always `REPLY`: this codec's serialize path
/// is only ever used to send reply/push records back to a client.
///
/// Returns the number of bytes written, or `None` if `buf` is too small for
/// any field.
pub fn serialize(rec: &Record, buf: &mut Vec<u8>) -> Option<usize> {
    let start = buf.len();

    write_u16_field(buf, FIELD_ACTION, Action::Reply.as_u16())?;
    write_bytes_field(buf, FIELD_SERNUM, &rec.serial)?;
    write_bytes_field(buf, FIELD_DEVTYPE, &rec.dev_type)?;
    write_bytes_field(buf, FIELD_DATA, &rec.data)?;
    write_time_field(buf, FIELD_TIME, rec.timestamp)?;

    Some(buf.len() - start)
}

#[inline]
fn write_u16_field(buf: &mut Vec<u8>, field_type: u16, value: u16) -> Option<()> {
    buf.extend_from_slice(&field_type.to_be_bytes());
    buf.extend_from_slice(&2u16.to_be_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
    Some(())
}

#[inline]
fn write_bytes_field(buf: &mut Vec<u8>, field_type: u16, value: &[u8]) -> Option<()> {
    let len: u16 = value.len().try_into().ok()?;
    buf.extend_from_slice(&field_type.to_be_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value);
    Some(())
}

#[inline]
fn write_time_field(buf: &mut Vec<u8>, field_type: u16, ts: Timestamp) -> Option<()> {
    buf.extend_from_slice(&field_type.to_be_bytes());
    buf.extend_from_slice(&8u16.to_be_bytes());
    buf.extend_from_slice(&ts.sec.to_be_bytes());
    buf.extend_from_slice(&ts.usec.to_be_bytes());
    Some(())
}

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use telemetry_protocol::{Action, Record, Timestamp, DATA_CAP, DEV_TYPE_CAP, SERIAL_CAP};

use crate::{SendFn, Sink};

const DEFAULT_FILENAME: &str = "filedb.bin";
const QUERY_BUF_SIZE: usize = 1500;
const U32_SIZE: usize = 4;

/// Append-only binary file sink: stores records as a flat sequence of
/// length-prefixed fields, no header, no terminator, and answers `GET_AFTER`
/// queries by scanning the file from the start.
pub struct BinaryFileSink {
    file: Option<File>,
}

impl BinaryFileSink {
    pub fn new() -> Self {
        Self { file: None }
    }

    fn store_rec(&mut self, rec: &Record) -> i32 {
        let Some(file) = self.file.as_mut() else { return -1 };

        let mut buf = Vec::with_capacity(8 + 3 * U32_SIZE + rec.serial.len() + rec.dev_type.len() + rec.data.len());
        buf.extend_from_slice(&rec.timestamp.sec.to_be_bytes());
        buf.extend_from_slice(&rec.timestamp.usec.to_be_bytes());
        write_pascal(&mut buf, rec.serial.as_slice());
        write_pascal(&mut buf, rec.dev_type.as_slice());
        write_pascal(&mut buf, rec.data.as_slice());

        match file.write_all(&buf) {
            Ok(()) => 1,
            Err(err) => {
                tracing::error!(%err, "binary file sink: store failed");
                -1
            }
        }
    }

    fn query_rec(&mut self, reference: &Record, send: &mut SendFn<'_>) -> i32 {
        let Some(file) = self.file.as_mut() else { return -1 };

        if let Err(err) = file.seek(SeekFrom::Start(0)) {
            tracing::error!(%err, "binary file sink: seek to start failed");
            return -1;
        }

        let mut buf = vec![0u8; QUERY_BUF_SIZE];
        let mut filled = 0usize;

        loop {
            let read = match file.read(&mut buf[filled..]) {
                Ok(n) => n,
                Err(err) => {
                    tracing::error!(%err, "binary file sink: read failed");
                    return -1;
                }
            };
            if read == 0 {
                // EOF; any bytes left in buf[0..filled] are an incomplete
                // trailing write and are discarded.
                break;
            }
            filled += read;

            let mut cursor = 0;
            while let Some((mut candidate, consumed)) = decode_stored(&buf[cursor..filled]) {
                cursor += consumed;
                candidate.action = Action::Reply;
                if candidate.matches(reference) && send(candidate, reference.priv_handle) < 0 {
                    return 0;
                }
            }

            if cursor > 0 {
                buf.copy_within(cursor..filled, 0);
                filled -= cursor;
            }

            if filled == buf.len() {
                tracing::error!("binary file sink: stored record exceeds scratch buffer capacity");
                return -1;
            }
        }

        0
    }
}

impl Default for BinaryFileSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for BinaryFileSink {
    fn open(&mut self, options: &str) -> bool {
        let path = if options.is_empty() { DEFAULT_FILENAME } else { options };
        match OpenOptions::new().create(true).read(true).append(true).open(path) {
            Ok(file) => {
                self.file = Some(file);
                true
            }
            Err(err) => {
                tracing::error!(%err, path, "binary file sink: open failed");
                false
            }
        }
    }

    fn process(&mut self, rec: &Record, send: &mut SendFn<'_>) -> i32 {
        match rec.action {
            Action::Store => self.store_rec(rec),
            Action::GetAfter => self.query_rec(rec, send),
            _ => 0,
        }
    }
}

fn write_pascal(buf: &mut Vec<u8>, value: &[u8]) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value);
}

/// Decodes one stored record from `buf`, returning the record and the
/// number of bytes it occupied, or `None` if `buf` doesn't yet hold a
/// complete record.
fn decode_stored(buf: &[u8]) -> Option<(Record, usize)> {
    if buf.len() < 2 * U32_SIZE {
        return None;
    }
    let sec = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let usec = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    let mut pos = 8;

    let (serial, pos2) = read_pascal(buf, pos)?;
    pos = pos2;
    let (dev_type, pos2) = read_pascal(buf, pos)?;
    pos = pos2;
    let (data, pos2) = read_pascal(buf, pos)?;
    pos = pos2;

    let record = Record {
        timestamp: Timestamp { sec, usec },
        action: Action::Reply,
        dev_type: dev_type.iter().take(DEV_TYPE_CAP).copied().collect(),
        serial: serial.iter().take(SERIAL_CAP).copied().collect(),
        data: data.iter().take(DATA_CAP).copied().collect(),
        priv_handle: 0,
    };
    Some((record, pos))
}

fn read_pascal(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos + U32_SIZE > buf.len() {
        return None;
    }
    let len = u32::from_be_bytes(buf[pos..pos + U32_SIZE].try_into().unwrap()) as usize;
    let start = pos + U32_SIZE;
    if start + len > buf.len() {
        return None;
    }
    Some((&buf[start..start + len], start + len))
}

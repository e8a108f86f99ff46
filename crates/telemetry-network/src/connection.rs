use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use telemetry_protocol::{deserialize, serialize, Decoded, Record, START_MARKER};
use tracing::{trace, warn};

/// Size of a client's receive buffer. Matches the reference implementation's
/// fixed scratch-buffer size; a well-formed record is well under 150 bytes,
/// so this leaves ample room for several in-flight frames.
pub const RX_BUF_SIZE: usize = 1500;

/// Outcome of reading from a client socket.
pub enum ReadOutcome {
    /// The socket had no more data ready; caller should stop reading.
    WouldBlock,
    /// The peer closed the connection, or an I/O error occurred.
    Disconnected,
}

/// One accepted TCP client: socket, receive buffer, and send backlog.
///
/// Frames have no length prefix; the end of a record is detected
/// structurally by the codec (unknown or duplicate field type). A corrupted
/// byte stream re-synchronizes at the next start marker.
pub struct ClientConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    handle: u64,
    rx_buf: Vec<u8>,
    filled: usize,
    /// Set once this connection has sent `OBSERVE`; the front-end uses this
    /// to know whether to `detach` it from the observer on disconnect.
    pub observer_connected: bool,
    send_backlog: VecDeque<Vec<u8>>,
    writable_armed: bool,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, handle: u64) -> Self {
        Self {
            stream,
            peer_addr,
            handle,
            rx_buf: vec![0u8; RX_BUF_SIZE],
            filled: 0,
            observer_connected: false,
            send_backlog: VecDeque::new(),
            writable_armed: false,
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn token(&self) -> Token {
        Token(self.handle as usize)
    }

    /// Reads everything currently available, parsing and dispatching each
    /// complete, valid record to `on_record` as it's found. Loops until the
    /// socket would block (mio reports readiness edge-triggered, so a single
    /// `read` may not drain everything the kernel has buffered).
    pub fn read_available(
        &mut self,
        mut on_record: impl FnMut(Record),
    ) -> Result<(), ReadOutcome> {
        loop {
            if self.filled == self.rx_buf.len() {
                // No start marker found anywhere in a full buffer's worth of
                // garbage; there is no legitimate record this large, so drop
                // everything and re-synchronize on whatever arrives next.
                warn!(handle = self.handle, "receive buffer full with no parsable frame, dropping");
                self.filled = 0;
            }

            match self.stream.read(&mut self.rx_buf[self.filled..]) {
                Ok(0) => return Err(ReadOutcome::Disconnected),
                Ok(n) => {
                    self.filled += n;
                    self.drain_records(&mut on_record);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(());
                }
                Err(err) => {
                    trace!(handle = self.handle, %err, "client read error");
                    return Err(ReadOutcome::Disconnected);
                }
            }
        }
    }

    /// Scans `rx_buf[..filled]` for framed records, dispatching each valid
    /// one, then compacts any unconsumed tail back to the start of the
    /// buffer for the next read.
    fn drain_records(&mut self, on_record: &mut impl FnMut(Record)) {
        let bytes = self.filled;
        let mut cursor = 0usize;

        loop {
            let Some(marker_offset) = find_marker(&self.rx_buf[cursor..bytes]) else {
                // No marker in the remainder. Keep a single trailing byte
                // only if it could be the first half of a split marker.
                cursor = if bytes > cursor && self.rx_buf[bytes - 1] == START_MARKER[0] {
                    bytes - 1
                } else {
                    bytes
                };
                break;
            };
            cursor += marker_offset;
            let body_start = cursor + START_MARKER.len();
            if body_start > bytes {
                break; // marker found but its body hasn't arrived yet
            }

            match deserialize(&self.rx_buf[body_start..bytes]) {
                Decoded::Invalid => {
                    // Validation failure: resynchronize just past this marker.
                    cursor = body_start;
                }
                Decoded::Incomplete => {
                    break; // keep the marker in place, wait for more bytes
                }
                Decoded::Record { mut record, consumed } => {
                    cursor = body_start + consumed;
                    record.priv_handle = self.handle;
                    if record.validate() {
                        on_record(record);
                    }
                }
            }
        }

        if cursor > 0 {
            self.rx_buf.copy_within(cursor..bytes, 0);
        }
        self.filled = bytes - cursor;
    }

    /// Serializes `rec` with its start marker and writes it, falling back to
    /// the per-connection backlog if the kernel socket buffer is full.
    /// Returns `0` on success (including a backlog enqueue), `-1` on a hard
    /// write/serialization failure.
    pub fn send_record(&mut self, registry: &Registry, rec: &Record) -> i32 {
        let mut frame = Vec::with_capacity(160);
        frame.extend_from_slice(&START_MARKER);
        if serialize(rec, &mut frame).is_none() {
            warn!(handle = self.handle, "failed to serialize reply frame");
            return -1;
        }

        if !self.send_backlog.is_empty() {
            self.enqueue(registry, frame);
            return 0;
        }

        match self.stream.write(&frame) {
            Ok(n) if n == frame.len() => 0,
            Ok(n) => {
                self.enqueue(registry, frame[n..].to_vec());
                0
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                self.enqueue(registry, frame);
                0
            }
            Err(err) => {
                warn!(handle = self.handle, %err, "write failed");
                -1
            }
        }
    }

    fn enqueue(&mut self, registry: &Registry, data: Vec<u8>) {
        self.send_backlog.push_back(data);
        self.arm_writable(registry);
    }

    fn arm_writable(&mut self, registry: &Registry) {
        if !self.writable_armed {
            if let Err(err) =
                registry.reregister(&mut self.stream, self.token(), Interest::READABLE | Interest::WRITABLE)
            {
                warn!(handle = self.handle, %err, "failed to arm writable interest");
            }
            self.writable_armed = true;
        }
    }

    /// Flushes as much of the backlog as the socket will currently accept.
    /// Returns `Err` if the peer is gone.
    pub fn drain_backlog(&mut self, registry: &Registry) -> Result<(), ReadOutcome> {
        while let Some(front) = self.send_backlog.front_mut() {
            match self.stream.write(front) {
                Ok(0) => return Err(ReadOutcome::Disconnected),
                Ok(n) if n == front.len() => {
                    self.send_backlog.pop_front();
                }
                Ok(n) => {
                    front.drain(..n);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(handle = self.handle, %err, "backlog write failed");
                    return Err(ReadOutcome::Disconnected);
                }
            }
        }

        if self.send_backlog.is_empty() && self.writable_armed {
            if let Err(err) = registry.reregister(&mut self.stream, self.token(), Interest::READABLE) {
                warn!(handle = self.handle, %err, "failed to disarm writable interest");
                return Err(ReadOutcome::Disconnected);
            }
            self.writable_armed = false;
        }

        Ok(())
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token(), Interest::READABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn find_marker(buf: &[u8]) -> Option<usize> {
    buf.windows(START_MARKER.len()).position(|w| w == START_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_protocol::Action;

    fn field(field_type: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&field_type.to_be_bytes());
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    fn store_frame() -> Vec<u8> {
        let mut frame = START_MARKER.to_vec();
        frame.extend(field(1, &1u16.to_be_bytes())); // ACTION=STORE
        frame.extend(field(2, b"1")); // SERNUM
        frame.extend(field(3, b"s")); // DEVTYPE
        frame.extend(field(4, b"hi")); // DATA
        frame
    }

    #[test]
    fn find_marker_locates_sequence() {
        let buf = [0xAA, 0xBB, 0x5A, 0x5A, 0xCC];
        assert_eq!(find_marker(&buf), Some(2));
    }

    #[test]
    fn find_marker_returns_none_without_match() {
        let buf = [0x5A, 0xAA, 0x5A, 0xBB];
        assert_eq!(find_marker(&buf), None);
    }

    fn loopback_connection(handle: u64) -> ClientConnection {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server_side, peer_addr) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        std::mem::forget(client); // keep the peer alive for the test's duration
        ClientConnection::new(TcpStream::from_std(server_side), peer_addr, handle)
    }

    #[test]
    fn garbage_prefix_is_discarded_before_valid_frame() {
        let mut buf = vec![0xDE, 0xAD, 0xBE, 0xEF];
        buf.extend(store_frame());

        let mut conn = loopback_connection(7);
        conn.rx_buf[..buf.len()].copy_from_slice(&buf);
        conn.filled = buf.len();

        let mut records = Vec::new();
        conn.drain_records(&mut |rec| records.push(rec));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, Action::Store);
        assert_eq!(records[0].priv_handle, 7);
        assert_eq!(conn.filled, 0);
    }
}

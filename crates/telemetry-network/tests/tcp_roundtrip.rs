//! End-to-end exercises over real loopback TCP sockets, driving the server's
//! `mio` event loop in a background thread the way a real client would see
//! it: raw framed bytes in, raw framed bytes out.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use telemetry_network::Server;
use telemetry_sink::BinaryFileSink;

const ACTION: u16 = 1;
const SERNUM: u16 = 2;
const DEVTYPE: u16 = 3;
const DATA: u16 = 4;
const TIME: u16 = 5;

const ACT_STORE: u16 = 1;
const ACT_GET_AFTER: u16 = 2;
const ACT_OBSERVE: u16 = 3;

fn field(buf: &mut Vec<u8>, field_type: u16, value: &[u8]) {
    buf.extend_from_slice(&field_type.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

fn store_frame(dev: &[u8], serial: &[u8], data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x5A, 0x5A];
    field(&mut buf, ACTION, &ACT_STORE.to_be_bytes());
    field(&mut buf, SERNUM, serial);
    field(&mut buf, DEVTYPE, dev);
    field(&mut buf, DATA, data);
    buf
}

fn query_frame(dev: &[u8], serial: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x5A, 0x5A];
    field(&mut buf, ACTION, &ACT_GET_AFTER.to_be_bytes());
    field(&mut buf, SERNUM, serial);
    field(&mut buf, DEVTYPE, dev);
    let mut time_val = Vec::new();
    time_val.extend_from_slice(&0u32.to_be_bytes());
    time_val.extend_from_slice(&0u32.to_be_bytes());
    field(&mut buf, TIME, &time_val);
    buf
}

fn observe_frame(dev: &[u8], serial: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x5A, 0x5A];
    field(&mut buf, ACTION, &ACT_OBSERVE.to_be_bytes());
    field(&mut buf, SERNUM, serial);
    field(&mut buf, DEVTYPE, dev);
    buf
}

/// Starts a server backed by a fresh temp-file sink on an OS-assigned port,
/// returning its address. The background thread is intentionally left
/// running; it dies with the test process.
fn start_server() -> SocketAddr {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let path = tmp.path().to_path_buf();
    std::mem::forget(tmp); // keep the file alive for the server's lifetime

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut sink = Box::new(BinaryFileSink::new());
    assert!(sink.open(path.to_str().unwrap()));
    let mut server = Server::bind(addr, sink).unwrap();
    let bound = server.local_addr().unwrap();

    thread::spawn(move || {
        let stop = AtomicBool::new(false);
        server.run(&stop).unwrap();
    });

    bound
}

fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
    // Every reply frame is well under this size; block until at least the
    // marker and a minimal TLV set have arrived.
    let mut buf = vec![0u8; 256];
    let n = stream.read(&mut buf).expect("read reply");
    buf.truncate(n);
    buf
}

#[test]
fn store_then_query_round_trip() {
    let addr = start_server();

    let mut writer = TcpStream::connect(addr).unwrap();
    writer.write_all(&store_frame(b"s", b"1", b"hi")).unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut reader = TcpStream::connect(addr).unwrap();
    reader.write_all(&query_frame(b"s", b"1")).unwrap();
    thread::sleep(Duration::from_millis(100));

    let reply = read_reply(&mut reader);
    assert!(reply.windows(2).any(|w| w == [0x5A, 0x5A]), "no framed reply received");
    let as_text = String::from_utf8_lossy(&reply);
    assert!(as_text.contains("hi"), "reply did not contain stored payload: {as_text:?}");
}

#[test]
fn wildcard_query_returns_both_stores() {
    let addr = start_server();

    let mut writer = TcpStream::connect(addr).unwrap();
    writer.write_all(&store_frame(b"a", b"1", b"x")).unwrap();
    writer.write_all(&store_frame(b"b", b"2", b"y")).unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut reader = TcpStream::connect(addr).unwrap();
    reader.write_all(&query_frame(b"*", b"*")).unwrap();
    thread::sleep(Duration::from_millis(150));

    let reply = read_reply(&mut reader);
    let as_text = String::from_utf8_lossy(&reply);
    assert!(as_text.contains('x') && as_text.contains('y'), "missing a stored record: {as_text:?}");
}

#[test]
fn observe_receives_subsequent_store() {
    let addr = start_server();

    let mut observer = TcpStream::connect(addr).unwrap();
    observer.write_all(&observe_frame(b"*", b"*")).unwrap();
    thread::sleep(Duration::from_millis(50));

    let mut storer = TcpStream::connect(addr).unwrap();
    storer.write_all(&store_frame(b"x", b"y", b"z")).unwrap();
    thread::sleep(Duration::from_millis(150));

    let reply = read_reply(&mut observer);
    let as_text = String::from_utf8_lossy(&reply);
    assert!(as_text.contains('z'), "observer did not receive pushed record: {as_text:?}");
}

#[test]
fn corrupted_prefix_is_discarded_and_store_still_lands() {
    let addr = start_server();

    let mut writer = TcpStream::connect(addr).unwrap();
    let mut bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
    bytes.extend(store_frame(b"s", b"9", b"garbage-prefixed"));
    writer.write_all(&bytes).unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut reader = TcpStream::connect(addr).unwrap();
    reader.write_all(&query_frame(b"s", b"9")).unwrap();
    thread::sleep(Duration::from_millis(100));

    let reply = read_reply(&mut reader);
    let as_text = String::from_utf8_lossy(&reply);
    assert!(as_text.contains("garbage-prefixed"));
}

#[test]
fn split_frame_across_two_writes_is_still_parsed() {
    let addr = start_server();
    let frame = store_frame(b"s", b"5", b"split-me");

    let mut writer = TcpStream::connect(addr).unwrap();
    writer.write_all(&frame[..7]).unwrap();
    thread::sleep(Duration::from_millis(50));
    writer.write_all(&frame[7..]).unwrap();
    thread::sleep(Duration::from_millis(100));

    let mut reader = TcpStream::connect(addr).unwrap();
    reader.write_all(&query_frame(b"s", b"5")).unwrap();
    thread::sleep(Duration::from_millis(100));

    let reply = read_reply(&mut reader);
    let as_text = String::from_utf8_lossy(&reply);
    assert!(as_text.contains("split-me"));
}

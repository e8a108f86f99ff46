use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};
use socket2::{Domain, Socket, Type};
use telemetry_observer::Observer;
use telemetry_protocol::{Action, Record};
use telemetry_sink::Sink;
use tracing::{error, info, warn};

use crate::connection::ClientConnection;

/// Reserved token for the listening socket; client handles are minted from
/// `0` upward, so this sentinel never collides with one.
const LISTENER_TOKEN: Token = Token(usize::MAX);
const LISTEN_BACKLOG: i32 = 10;

/// Single-threaded, readiness-driven TCP front-end.
///
/// Owns the listening socket, every accepted client connection, the sink
/// records are stored through, and the observer that relays stores to
/// subscribers. Drives exactly one `mio::Poll` with no timeout; see
/// [`Server::run`].
pub struct Server {
    listener: TcpListener,
    clients: HashMap<Token, ClientConnection>,
    poll: Poll,
    events: Events,
    next_handle: u64,
    sink: Box<dyn Sink>,
    observer: Observer,
}

impl Server {
    /// Binds a listener on `addr` with `SO_REUSEADDR` and a backlog of 10,
    /// and registers it for read-readiness.
    pub fn bind(addr: SocketAddr, sink: Box<dyn Sink>) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(socket.into());

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            listener,
            clients: HashMap::new(),
            poll,
            events: Events::with_capacity(128),
            next_handle: 0,
            sink,
            observer: Observer::new(),
        })
    }

    /// Local address of the listening socket (used by tests and startup
    /// logging to report the bound port when `0` was requested).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop until `stop` is observed set, or the readiness
    /// wait is interrupted by a signal. Both are clean exits.
    pub fn run(&mut self, stop: &AtomicBool) -> io::Result<()> {
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("stop requested, shutting down");
                return Ok(());
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                    info!("poll interrupted, shutting down");
                    return Ok(());
                }
                Err(err) => {
                    error!(%err, "poll wait failed");
                    return Err(err);
                }
            }

            let ready: Vec<(Token, bool, bool)> =
                self.events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();

            for (token, readable, writable) in ready {
                if token == LISTENER_TOKEN {
                    self.accept_all();
                    continue;
                }
                if writable {
                    self.handle_writable(token);
                }
                if readable && self.clients.contains_key(&token) {
                    self.handle_readable(token);
                }
            }
        }
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let handle = self.next_handle;
                    self.next_handle += 1;
                    let token = Token(handle as usize);

                    let mut conn = ClientConnection::new(stream, peer_addr, handle);
                    if let Err(err) = conn.register(self.poll.registry()) {
                        warn!(%err, "failed to register accepted client");
                        continue;
                    }
                    info!(%peer_addr, handle, "client connected");
                    self.clients.insert(token, conn);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let registry = self.poll.registry();
        let Some(conn) = self.clients.get_mut(&token) else { return };
        if conn.drain_backlog(registry).is_err() {
            self.disconnect(token);
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let mut pending = Vec::new();
        let outcome = match self.clients.get_mut(&token) {
            Some(conn) => conn.read_available(|rec| pending.push(rec)),
            None => return,
        };

        for rec in pending {
            dispatch(&mut self.clients, self.poll.registry(), self.sink.as_mut(), &mut self.observer, token, rec);
        }

        if outcome.is_err() {
            self.disconnect(token);
        }
    }

    fn disconnect(&mut self, token: Token) {
        if let Some(mut conn) = self.clients.remove(&token) {
            if conn.observer_connected {
                self.observer.detach(conn.handle());
            }
            conn.deregister(self.poll.registry());
            info!(handle = conn.handle(), peer = %conn.peer_addr(), "client disconnected");
        }
    }
}

/// Routes one decoded, validated record to the sink and/or observer.
///
/// A free function rather than a `Server` method: it needs `clients` and
/// `registry` borrowed mutably/immutably at the same time as `sink` and
/// `observer`, which field-level borrows of `self` support but a method
/// taking `&mut self` would not.
fn dispatch(
    clients: &mut HashMap<Token, ClientConnection>,
    registry: &Registry,
    sink: &mut dyn Sink,
    observer: &mut Observer,
    token: Token,
    rec: Record,
) {
    if rec.action == Action::Observe {
        let handle = rec.priv_handle;
        observer.attach(rec, handle);
        if let Some(conn) = clients.get_mut(&token) {
            conn.observer_connected = true;
        }
        return;
    }

    let is_query = rec.action == Action::GetAfter;
    let mut send = |reply: Record, handle: u64| -> i32 {
        let target = Token(handle as usize);
        match clients.get_mut(&target) {
            Some(conn) => conn.send_record(registry, &reply),
            None => -1,
        }
    };

    let result = sink.process(&rec, &mut send);
    if result == 1 {
        observer.relay(&rec, &mut send);
    }
    if is_query {
        send(Record::empty_reply(), rec.priv_handle);
    }
}

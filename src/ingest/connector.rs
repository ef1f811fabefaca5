//! Cancellable non-blocking TCP connect.
//!
//! A `Connector` owns one readiness poller per streaming session. The poller
//! watches the camera socket and a `CancelToken`; every blocking point of the
//! session (the connect itself and each later read or write wait) is a single
//! `poll` over that set, with no timeout.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::{ConnectError, SocketError};

const SOCKET: Token = Token(0);
const CANCEL: Token = Token(1);
const EVENT_CAPACITY: usize = 8;

// ----------------------------------------------------------------------------
// CancelToken
// ----------------------------------------------------------------------------

/// Signal that interrupts the session's pending wait.
///
/// The flag is sticky: a cancel raised before the wait starts is observed by
/// the next wait.
pub struct CancelToken {
    waker: Waker,
    signalled: AtomicBool,
}

impl CancelToken {
    pub fn cancel(&self) {
        if !self.signalled.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.waker.wake() {
                log::warn!("Connector: failed to wake poller: {}", err);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("signalled", &self.is_cancelled())
            .finish()
    }
}

/// Outcome of waiting for socket readiness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Cancelled,
}

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

pub struct Connector {
    poll: Poll,
    events: Events,
    cancel: Arc<CancelToken>,
}

impl Connector {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), CANCEL)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            cancel: Arc::new(CancelToken {
                waker,
                signalled: AtomicBool::new(false),
            }),
        })
    }

    /// Token that interrupts this connector's waits.
    pub fn cancel_token(&self) -> Arc<CancelToken> {
        self.cancel.clone()
    }

    /// Connects to `host:port`, blocking until the connect completes, fails,
    /// or the cancel token fires.
    ///
    /// The returned stream stays registered with this connector so that
    /// `wait` can be used for the rest of the session.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<TcpStream, ConnectError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectError::Cancelled);
        }
        let addr = resolve(host, port)?;

        let mut stream = TcpStream::connect(addr).map_err(ConnectError::Generic)?;
        if let Err(err) = self.poll.registry().register(
            &mut stream,
            SOCKET,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            return Err(ConnectError::Generic(err));
        }

        loop {
            let (writable, exceptional) = match self.poll_socket() {
                Ok(Some(flags)) => flags,
                Ok(None) => {
                    self.abandon(stream);
                    return Err(ConnectError::Cancelled);
                }
                Err(err) => {
                    self.abandon(stream);
                    return Err(ConnectError::Generic(err));
                }
            };

            if !writable && !exceptional {
                continue;
            }
            if !writable {
                let err = stream
                    .take_error()
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| io::Error::other("socket entered an exceptional state"));
                self.abandon(stream);
                return Err(ConnectError::Generic(err));
            }

            match stream.take_error() {
                Ok(None) => {}
                Ok(Some(err)) | Err(err) => {
                    self.abandon(stream);
                    return Err(ConnectError::Generic(err));
                }
            }
            match stream.peer_addr() {
                Ok(_) => return Ok(stream),
                // Spurious wakeup; the connect is still in flight.
                Err(err) if err.kind() == io::ErrorKind::NotConnected => continue,
                Err(err) => {
                    self.abandon(stream);
                    return Err(ConnectError::Generic(err));
                }
            }
        }
    }

    /// Blocks until the connected socket is ready for `interest` or the token
    /// fires. Closed and errored sockets count as ready; the next I/O call
    /// reports the failure.
    pub fn wait(&mut self, interest: Interest) -> Result<Readiness, SocketError> {
        loop {
            self.poll_events().map_err(SocketError::Generic)?;
            if self.cancel.is_cancelled() {
                return Ok(Readiness::Cancelled);
            }

            let mut writable = false;
            let mut readable = false;
            for event in self.events.iter().filter(|e| e.token() == SOCKET) {
                let failed = event.is_error();
                writable |= event.is_writable() || event.is_write_closed() || failed;
                readable |= event.is_readable() || event.is_read_closed() || failed;
            }

            if (interest.is_readable() && readable) || (interest.is_writable() && writable) {
                return Ok(Readiness::Ready);
            }
        }
    }

    /// Polls once; `None` means the token fired.
    fn poll_socket(&mut self) -> io::Result<Option<(bool, bool)>> {
        self.poll_events()?;
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        let mut writable = false;
        let mut exceptional = false;
        for event in self.events.iter().filter(|e| e.token() == SOCKET) {
            writable |= event.is_writable();
            exceptional |= event.is_error() || event.is_write_closed();
        }
        Ok(Some((writable, exceptional)))
    }

    fn poll_events(&mut self) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn abandon(&self, mut stream: TcpStream) {
        let _ = self.poll.registry().deregister(&mut stream);
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| ConnectError::Resolve {
            host: host.to_string(),
            port,
            source: Some(err),
        })?;
    addrs.next().ok_or_else(|| ConnectError::Resolve {
        host: host.to_string(),
        port,
        source: None,
    })
}

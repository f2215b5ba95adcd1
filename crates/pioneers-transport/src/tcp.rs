use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use pioneers_frame::Packet;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::link::{RemoteLink, StreamLink};

/// Which side of the TCP connection this node plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpRole {
    /// Listen on the address and accept a single peer at a time.
    Server(String),
    /// Connect out to the address.
    Client(String),
}

impl std::fmt::Display for TcpRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpRole::Server(addr) => write!(f, "tcp-server://{addr}"),
            TcpRole::Client(addr) => write!(f, "tcp-client://{addr}"),
        }
    }
}

/// TCP packet link between the two flight computers (or to a ground station).
///
/// A client dials on a helper thread: `connect` starts the attempt and a
/// later `connect` or `recv` picks up the stream, so name resolution and the
/// handshake never stall the caller.
#[derive(Debug)]
pub struct TcpLink {
    role: TcpRole,
    listener: Option<TcpListener>,
    link: StreamLink<TcpStream>,
    connect_timeout: Duration,
    dialing: Option<Receiver<io::Result<TcpStream>>>,
}

impl TcpLink {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

    pub fn new(role: TcpRole) -> Self {
        Self {
            role,
            listener: None,
            link: StreamLink::new(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            dialing: None,
        }
    }

    pub fn server(addr: impl Into<String>) -> Self {
        Self::new(TcpRole::Server(addr.into()))
    }

    pub fn client(addr: impl Into<String>) -> Self {
        Self::new(TcpRole::Client(addr.into()))
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn role(&self) -> &TcpRole {
        &self.role
    }

    /// Address the server is listening on, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.stream().and_then(|s| s.peer_addr().ok())
    }

    /// A client connect attempt is in flight.
    pub fn is_dialing(&self) -> bool {
        self.dialing.is_some()
    }

    fn bind(&mut self, addr: &str) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            endpoint: addr.to_string(),
            source: e,
        })?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "listening for peer");
        self.listener = Some(listener);
        Ok(())
    }

    /// Accept a waiting peer, if any.
    fn try_accept(&mut self) -> Result<()> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(());
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                prepare(&stream)?;
                info!(%peer, "peer connected");
                self.link.attach(stream);
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    /// Start a connect attempt, or collect the one in flight.
    fn dial(&mut self, addr: &str) -> Result<()> {
        let connect_err = |source| TransportError::Connect {
            endpoint: addr.to_string(),
            source,
        };
        let Some(pending) = self.dialing.as_ref() else {
            let (tx, rx) = mpsc::channel();
            let target = addr.to_string();
            let timeout = self.connect_timeout;
            std::thread::Builder::new()
                .name("tcp-dial".into())
                .spawn(move || {
                    // The link may have been closed meanwhile; nobody listens then.
                    let _ = tx.send(open_stream(&target, timeout));
                })
                .map_err(connect_err)?;
            debug!(endpoint = addr, "dialing peer");
            self.dialing = Some(rx);
            return Ok(());
        };

        let outcome = match pending.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => Err(io::Error::other("dial thread exited")),
        };
        self.dialing = None;
        let stream = outcome.map_err(connect_err)?;
        prepare(&stream)?;
        info!(peer = %addr, "connected to peer");
        self.link.attach(stream);
        Ok(())
    }
}

fn open_stream(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let target = addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
    })?;
    TcpStream::connect_timeout(&target, timeout)
}

fn prepare(stream: &TcpStream) -> Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    Ok(())
}

impl RemoteLink for TcpLink {
    fn connect(&mut self) -> Result<()> {
        if self.link.is_attached() {
            return Ok(());
        }
        match self.role.clone() {
            TcpRole::Server(addr) => {
                self.bind(&addr)?;
                self.try_accept()
            }
            TcpRole::Client(addr) => self.dial(&addr),
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.link.send(packet)
    }

    fn recv(&mut self) -> Result<Option<Packet>> {
        if !self.link.is_attached() {
            match self.role.clone() {
                TcpRole::Server(_) => self.try_accept()?,
                TcpRole::Client(addr) if self.dialing.is_some() => {
                    if let Err(err) = self.dial(&addr) {
                        debug!(endpoint = %addr, error = %err, "dial failed");
                    }
                }
                TcpRole::Client(_) => {}
            }
            if !self.link.is_attached() {
                return Ok(None);
            }
        }
        self.link.recv()
    }

    fn close(&mut self) {
        self.dialing = None;
        if self.link.detach().is_some() {
            debug!(endpoint = %self.role, "link closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_attached()
    }

    fn describe(&self) -> String {
        self.role.to_string()
    }
}

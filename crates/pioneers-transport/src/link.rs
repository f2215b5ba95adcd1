use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use pioneers_frame::{Packet, PacketReader, PACKET_SIZE};
use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// Read chunk size for one poll of the underlying stream.
const READ_CHUNK: usize = 8 * PACKET_SIZE;

/// Outbound bytes held while the peer is slow; further sends are refused.
const MAX_OUTBOUND: usize = 256 * PACKET_SIZE;

const CONNECT_POLL: Duration = Duration::from_millis(5);

/// A packet link to the other flight computer or to the ground segment.
///
/// Every call is non-blocking. `recv` yields at most one packet per call so
/// the caller can bound its loop latency.
pub trait RemoteLink {
    /// Establish (or re-establish) the connection. Returns `Ok(())` when there
    /// is nothing to do yet, e.g. a server still waiting for its peer.
    fn connect(&mut self) -> Result<()>;

    /// Queue one packet and push as much as the peer accepts.
    fn send(&mut self, packet: &Packet) -> Result<()>;

    /// Poll for one inbound packet.
    fn recv(&mut self) -> Result<Option<Packet>>;

    /// Drop the connection. Safe to call more than once.
    fn close(&mut self);

    fn is_connected(&self) -> bool;

    /// Human-readable endpoint for logs and diagnostics.
    fn describe(&self) -> String;
}

impl<L: RemoteLink + ?Sized> RemoteLink for Box<L> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        (**self).send(packet)
    }

    fn recv(&mut self) -> Result<Option<Packet>> {
        (**self).recv()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Call `connect` until the link is up or `within` has elapsed.
///
/// For tools that need a connection before doing anything else; the flight
/// loop calls `connect` once per reconnect period instead.
pub fn connect_within<L: RemoteLink + ?Sized>(link: &mut L, within: Duration) -> Result<()> {
    let deadline = Instant::now() + within;
    loop {
        link.connect()?;
        if link.is_connected() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TransportError::Connect {
                endpoint: link.describe(),
                source: std::io::Error::new(ErrorKind::TimedOut, "peer did not answer in time"),
            });
        }
        std::thread::sleep(CONNECT_POLL);
    }
}

/// Packet I/O over any non-blocking byte stream.
///
/// Inbound bytes go through a [`PacketReader`] so frames are recovered even
/// when the stream is not aligned. Outbound packets are buffered up to a fixed
/// bound; the stream is dropped as soon as the peer goes away.
#[derive(Debug)]
pub struct StreamLink<S> {
    stream: Option<S>,
    reader: PacketReader,
    outbound: BytesMut,
}

impl<S> Default for StreamLink<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StreamLink<S> {
    pub fn new() -> Self {
        Self {
            stream: None,
            reader: PacketReader::new(),
            outbound: BytesMut::with_capacity(4 * PACKET_SIZE),
        }
    }

    /// Start using `stream`, discarding any state left from a previous one.
    pub fn attach(&mut self, stream: S) {
        self.reader.clear();
        self.outbound.clear();
        self.stream = Some(stream);
    }

    pub fn detach(&mut self) -> Option<S> {
        self.outbound.clear();
        self.reader.clear();
        self.stream.take()
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    /// Bytes skipped while resynchronizing the inbound stream.
    pub fn dropped_bytes(&self) -> u64 {
        self.reader.dropped_bytes()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }
}

impl<S: Read + Write> StreamLink<S> {
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        if self.stream.is_none() {
            return Err(TransportError::Closed);
        }
        if self.outbound.len() + PACKET_SIZE > MAX_OUTBOUND {
            self.flush()?;
            if self.outbound.len() + PACKET_SIZE > MAX_OUTBOUND {
                warn!(pending = self.outbound.len(), "outbound buffer full, dropping packet");
                return Err(TransportError::WouldBlock);
            }
        }
        self.outbound.extend_from_slice(packet.as_bytes());
        self.flush()
    }

    /// Push buffered bytes until the stream would block.
    pub fn flush(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Closed);
        };
        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => return self.fail(TransportError::Closed),
                Ok(n) => self.outbound.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return self.fail(TransportError::from_io(err)),
            }
        }
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Option<Packet>> {
        if let Some(packet) = self.reader.next_packet() {
            return Ok(Some(packet));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Closed);
        };

        let mut chunk = [0u8; READ_CHUNK];
        let n = loop {
            match stream.read(&mut chunk) {
                Ok(0) => return self.fail(TransportError::Closed),
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return self.fail(TransportError::from_io(err)),
            }
        };
        self.reader.extend(&chunk[..n]);
        Ok(self.reader.next_packet())
    }

    fn fail<T>(&mut self, err: TransportError) -> Result<T> {
        debug!(error = %err, "stream link lost its peer");
        self.detach();
        Err(err)
    }
}

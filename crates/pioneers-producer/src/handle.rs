use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use pioneers_frame::{Packet, PacketReader, PACKET_SIZE};
use pioneers_transport::{Channel, TransportError};
use tracing::debug;

use crate::error::ProcessError;
use crate::process::{Liveness, ManagedChild, ProducerConfig, StopPolicy};

/// A running (or finished) producer process and the read end of its channel.
#[derive(Debug)]
pub struct ProducerHandle {
    child: ManagedChild,
    channel: Channel,
    reader: PacketReader,
    channel_closed: bool,
}

impl ProducerHandle {
    /// Open a channel and start the producer with the channel's write end as
    /// its stdout.
    pub fn spawn(config: ProducerConfig) -> Result<Self, ProcessError> {
        let spawn_err = |source| ProcessError::SpawnFailed {
            name: config.name.clone(),
            source,
        };

        let mut channel = Channel::open().map_err(|e| spawn_err(into_io(e)))?;
        let write_end = channel
            .take_write_end()
            .ok_or_else(|| spawn_err(std::io::ErrorKind::BrokenPipe.into()))?;

        // The Stdio (and with it our copy of the write end) is consumed by the
        // spawn, so the channel reports Closed once the child exits.
        let child = ManagedChild::spawn(config, Stdio::from(write_end))?;
        Ok(Self {
            child,
            channel,
            reader: PacketReader::new(),
            channel_closed: false,
        })
    }

    pub fn name(&self) -> &str {
        self.child.name()
    }

    pub fn config(&self) -> &ProducerConfig {
        self.child.config()
    }

    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn uptime(&self) -> Duration {
        self.child.uptime()
    }

    pub fn liveness(&self) -> Liveness {
        self.child.liveness()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.child.exit_status()
    }

    /// Bytes skipped on the channel while resynchronizing.
    pub fn dropped_bytes(&self) -> u64 {
        self.reader.dropped_bytes()
    }

    /// Take at most one packet from the channel.
    ///
    /// `Ok(None)` means nothing complete has arrived yet. The first read after
    /// the producer's end goes away returns [`TransportError::Closed`]; later
    /// calls only drain what is still buffered.
    pub fn poll_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        if let Some(packet) = self.reader.next_packet() {
            return Ok(Some(packet));
        }
        if self.channel_closed {
            return Ok(None);
        }

        let mut chunk = [0u8; 4 * PACKET_SIZE];
        match self.channel.try_read(&mut chunk) {
            Ok(n) => {
                self.reader.extend(&chunk[..n]);
                Ok(self.reader.next_packet())
            }
            Err(TransportError::WouldBlock) => Ok(None),
            Err(err) => {
                self.channel_closed = true;
                debug!(producer = %self.name(), error = %err, "producer channel closed");
                Err(err)
            }
        }
    }

    /// Check on the process without blocking.
    pub fn check_liveness(&mut self) -> Liveness {
        self.child.check_liveness()
    }

    pub fn exit_error(&self) -> Option<ProcessError> {
        self.child.exit_error()
    }

    /// Stop the producer (see [`ManagedChild::stop`]) and release its channel.
    pub fn stop(&mut self, policy: &StopPolicy) -> Result<Liveness, ProcessError> {
        let result = self.child.stop(policy);
        self.channel.close();
        self.channel_closed = true;
        result
    }
}

fn into_io(err: TransportError) -> std::io::Error {
    match err {
        TransportError::Io(err) => err,
        other => std::io::Error::other(other.to_string()),
    }
}

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};

use pioneers_frame::{Packet, PACKET_SIZE};
use tracing::debug;

use crate::error::{Result, TransportError};

/// A unidirectional, non-blocking byte pipe between a producer process and
/// the supervisor.
///
/// The supervisor creates the channel before spawning the producer, keeps the
/// read end and hands the write end over with [`take_write_end`]. Both ends
/// are close-on-exec, so the producer never inherits the read end.
///
/// [`take_write_end`]: Channel::take_write_end
#[derive(Debug)]
pub struct Channel {
    read: Option<File>,
    write: Option<File>,
}

impl Channel {
    /// Create a fresh pipe pair.
    pub fn open() -> Result<Self> {
        let (read, write) = pipe_pair()?;
        debug!(
            read_fd = read.as_raw_fd(),
            write_fd = write.as_raw_fd(),
            "channel opened"
        );
        Ok(Self {
            read: Some(File::from(read)),
            write: Some(File::from(write)),
        })
    }

    /// Wrap an inherited write end (the producer side), switching it to
    /// non-blocking mode.
    pub fn from_write_end(fd: OwnedFd) -> Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            read: None,
            write: Some(File::from(fd)),
        })
    }

    /// The producer side of a channel wired to this process's stdout.
    pub fn from_stdout() -> Result<Self> {
        let fd = std::io::stdout().as_fd().try_clone_to_owned()?;
        Self::from_write_end(fd)
    }

    /// Detach the write end so it can be moved into the producer process.
    pub fn take_write_end(&mut self) -> Option<OwnedFd> {
        self.write.take().map(OwnedFd::from)
    }

    /// Read whatever is available without blocking.
    ///
    /// Returns [`TransportError::WouldBlock`] when the pipe is empty and
    /// [`TransportError::Closed`] once every write end is gone.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.read.as_mut().ok_or(TransportError::Closed)?;
        loop {
            match file.read(buf) {
                Ok(0) if !buf.is_empty() => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_io(err)),
            }
        }
    }

    /// Write without blocking.
    ///
    /// Returns [`TransportError::WouldBlock`] when the pipe is full and
    /// [`TransportError::Closed`] once the read end is gone.
    pub fn try_write(&mut self, buf: &[u8]) -> Result<usize> {
        let file = self.write.as_mut().ok_or(TransportError::Closed)?;
        loop {
            match file.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_io(err)),
            }
        }
    }

    /// Write one whole packet.
    ///
    /// Packets are smaller than `PIPE_BUF`, so the pipe either takes all of it
    /// or none; anything else is reported as [`TransportError::ShortWrite`].
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let written = self.try_write(packet.as_bytes())?;
        if written != PACKET_SIZE {
            return Err(TransportError::ShortWrite {
                written,
                expected: PACKET_SIZE,
            });
        }
        Ok(())
    }

    /// Release both descriptors. Safe to call more than once.
    pub fn close(&mut self) {
        let had_read = self.read.take().is_some();
        let had_write = self.write.take().is_some();
        if had_read || had_write {
            debug!(had_read, had_write, "channel closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.read.is_none() && self.write.is_none()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(target_os = "linux")]
fn pipe_pair() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` is a valid, writable array of two c_ints as pipe2 requires.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by us.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

#[cfg(not(target_os = "linux"))]
fn pipe_pair() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` is a valid, writable array of two c_ints as pipe requires.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    // SAFETY: pipe succeeded, so both descriptors are open and owned by us.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [read.as_raw_fd(), write.as_raw_fd()] {
        set_cloexec(fd)?;
        set_nonblocking(fd)?;
    }
    Ok((read, write))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor we own; F_GETFL/F_SETFL do not touch memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor we own; F_GETFD/F_SETFD do not touch memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pioneers_frame::{decode, encode, ids, PacketReader};

    #[test]
    fn empty_pipe_would_block() {
        let mut channel = Channel::open().unwrap();
        let mut buf = [0u8; 32];
        let err = channel.try_read(&mut buf).unwrap_err();
        assert!(err.is_would_block());
    }

    #[test]
    fn packet_roundtrip_through_pipe() {
        let mut channel = Channel::open().unwrap();
        let packet = encode(ids::IMU_A_ACC_GYR, 5, &[7; 12]).unwrap();
        channel.write_packet(&packet).unwrap();

        let mut buf = [0u8; 64];
        let n = channel.try_read(&mut buf).unwrap();
        assert_eq!(n, PACKET_SIZE);

        let mut reader = PacketReader::new();
        reader.extend(&buf[..n]);
        let received = reader.next_packet().unwrap();
        assert_eq!(decode(&received).unwrap().index, 5);
    }

    #[test]
    fn closed_after_write_end_dropped() {
        let mut channel = Channel::open().unwrap();
        let write_end = channel.take_write_end().unwrap();
        drop(write_end);

        let mut buf = [0u8; 8];
        assert!(matches!(
            channel.try_read(&mut buf),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn write_after_read_end_dropped_is_closed() {
        let mut channel = Channel::open().unwrap();
        let write_end = channel.take_write_end().unwrap();
        let mut producer = Channel::from_write_end(write_end).unwrap();
        channel.close();

        let packet = encode(ids::STATUS_A, 0, b"x").unwrap();
        assert!(matches!(
            producer.write_packet(&packet),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn full_pipe_would_block() {
        let mut channel = Channel::open().unwrap();
        let packet = encode(ids::STATUS_B, 0, b"fill").unwrap();

        let mut saw_would_block = false;
        for _ in 0..100_000 {
            match channel.write_packet(&packet) {
                Ok(()) => {}
                Err(TransportError::WouldBlock) => {
                    saw_would_block = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_would_block);
    }

    #[test]
    fn close_is_idempotent() {
        let mut channel = Channel::open().unwrap();
        channel.close();
        assert!(channel.is_closed());
        channel.close();
        assert!(channel.is_closed());

        let mut buf = [0u8; 4];
        assert!(matches!(
            channel.try_read(&mut buf),
            Err(TransportError::Closed)
        ));
    }
}

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use pioneers_frame::Packet;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::link::{RemoteLink, StreamLink};

/// Line rate used by both the inter-node UART and the ImP sensor.
pub const DEFAULT_BAUD: u32 = 230_400;

fn speed_for(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

/// Open a tty in raw 8N1 mode at `baud`, non-blocking and without becoming the
/// controlling terminal.
pub fn open_serial(path: impl AsRef<Path>, baud: u32) -> Result<File> {
    let path = path.as_ref();
    let serial_err = |source| TransportError::Serial {
        path: path.to_path_buf(),
        source,
    };
    let speed = speed_for(baud).ok_or_else(|| {
        serial_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {baud}"),
        ))
    })?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)
        .map_err(serial_err)?;
    let fd = file.as_raw_fd();

    // SAFETY: `termios` is plain old data; tcgetattr fully initialises it
    // before any field is read, and `fd` stays open for the whole block.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(serial_err(std::io::Error::last_os_error()));
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;
        if libc::cfsetispeed(&mut tio, speed) != 0
            || libc::cfsetospeed(&mut tio, speed) != 0
            || libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0
        {
            return Err(serial_err(std::io::Error::last_os_error()));
        }
        libc::tcflush(fd, libc::TCIOFLUSH);
    }

    debug!(path = %path.display(), baud, "serial device configured");
    Ok(file)
}

/// Packet link over a UART.
///
/// A serial line has no connection state of its own: the link counts as
/// connected while the device is open.
#[derive(Debug)]
pub struct SerialLink {
    path: PathBuf,
    baud: u32,
    link: StreamLink<File>,
}

impl SerialLink {
    pub fn new(path: impl Into<PathBuf>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            link: StreamLink::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.link.dropped_bytes()
    }
}

impl RemoteLink for SerialLink {
    fn connect(&mut self) -> Result<()> {
        if self.link.is_attached() {
            return Ok(());
        }
        let file = open_serial(&self.path, self.baud)?;
        info!(path = %self.path.display(), baud = self.baud, "serial link open");
        self.link.attach(file);
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.link.send(packet)
    }

    fn recv(&mut self) -> Result<Option<Packet>> {
        if !self.link.is_attached() {
            return Ok(None);
        }
        self.link.recv()
    }

    fn close(&mut self) {
        if self.link.detach().is_some() {
            debug!(path = %self.path.display(), "serial link closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_attached()
    }

    fn describe(&self) -> String {
        format!("serial://{}@{}", self.path.display(), self.baud)
    }
}

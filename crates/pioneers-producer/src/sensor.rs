//! Sensors sampled by producer processes.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pioneers_frame::Node;
use pioneers_transport::{open_serial, TransportError};
use tracing::{debug, info, warn};

use crate::error::DeviceError;

/// Register bytes in one IMU sample: accel, gyro and mag, 6 bytes each.
pub const IMU_SAMPLE_LEN: usize = 18;

/// Bytes in one ImP record.
pub const IMP_RECORD_LEN: usize = 24;

/// A source of raw samples.
pub trait Sensor {
    /// Short device name for logs.
    fn name(&self) -> &str;

    /// Which node's measurement ids the samples belong to.
    fn node(&self) -> Node;

    /// Prepare the device for sampling.
    fn start(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Take one sample, returning its raw register bytes.
    fn sample(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// Leave the device in a quiescent state.
    fn shutdown(&mut self) {}
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn node(&self) -> Node {
        (**self).node()
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        (**self).start()
    }

    fn sample(&mut self) -> Result<Vec<u8>, DeviceError> {
        (**self).sample()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Deterministic stand-in for either node's sensor.
#[derive(Debug, Clone)]
pub struct SimulatedImu {
    node: Node,
    count: u64,
    fail_after: Option<u64>,
}

impl SimulatedImu {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            count: 0,
            fail_after: None,
        }
    }

    /// Fail with a device error once `samples` samples have been taken.
    pub fn fail_after(mut self, samples: u64) -> Self {
        self.fail_after = Some(samples);
        self
    }

    fn sample_len(&self) -> usize {
        match self.node {
            Node::A => IMU_SAMPLE_LEN,
            Node::B => IMP_RECORD_LEN,
        }
    }
}

impl Sensor for SimulatedImu {
    fn name(&self) -> &str {
        "simulated"
    }

    fn node(&self) -> Node {
        self.node
    }

    fn sample(&mut self) -> Result<Vec<u8>, DeviceError> {
        if self.fail_after.is_some_and(|limit| self.count >= limit) {
            return Err(DeviceError::Injected(self.count));
        }
        let seed = self.count;
        self.count += 1;
        Ok((0..self.sample_len())
            .map(|i| (seed as usize).wrapping_mul(31).wrapping_add(i * 7) as u8)
            .collect())
    }
}

/// `I2C_SLAVE` request from linux/i2c-dev.h.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Auto-increment flag for multi-byte register reads.
const AUTO_INCREMENT: u8 = 0x80;

mod lsm9ds1 {
    pub const ACC_GYR_ADDRESS: u16 = 0x6A;
    pub const MAG_ADDRESS: u16 = 0x1C;

    pub const OUT_X_L_XL: u8 = 0x28;
    pub const OUT_X_L_G: u8 = 0x18;
    pub const OUT_X_L_M: u8 = 0x28;

    pub const CTRL_REG1_G: u8 = 0x10;
    pub const ORIENT_CFG_G: u8 = 0x13;
    pub const CTRL_REG4: u8 = 0x1E;
    pub const CTRL_REG5_XL: u8 = 0x1F;
    pub const CTRL_REG6_XL: u8 = 0x20;
    pub const CTRL_REG1_M: u8 = 0x20;
    pub const CTRL_REG2_M: u8 = 0x21;
    pub const CTRL_REG3_M: u8 = 0x22;
    pub const CTRL_REG4_M: u8 = 0x23;

    /// (device, register, value) written before sampling.
    pub const SETUP: [(u16, u8, u8); 9] = [
        (ACC_GYR_ADDRESS, CTRL_REG5_XL, 0b0011_1000),
        (ACC_GYR_ADDRESS, CTRL_REG6_XL, 0b0110_0000),
        (ACC_GYR_ADDRESS, CTRL_REG1_G, 0b0110_0000),
        (ACC_GYR_ADDRESS, CTRL_REG4, 0b0011_1000),
        (ACC_GYR_ADDRESS, ORIENT_CFG_G, 0),
        (MAG_ADDRESS, CTRL_REG1_M, 0b1001_0000),
        (MAG_ADDRESS, CTRL_REG2_M, 0),
        (MAG_ADDRESS, CTRL_REG3_M, 0),
        (MAG_ADDRESS, CTRL_REG4_M, 0),
    ];

    /// (device, register, value) written on shutdown; CTRL_REG3_M = 0b11
    /// powers the magnetometer down.
    pub const RESET: [(u16, u8, u8); 9] = [
        (ACC_GYR_ADDRESS, CTRL_REG5_XL, 0),
        (ACC_GYR_ADDRESS, CTRL_REG6_XL, 0),
        (ACC_GYR_ADDRESS, CTRL_REG1_G, 0),
        (ACC_GYR_ADDRESS, CTRL_REG4, 0),
        (ACC_GYR_ADDRESS, ORIENT_CFG_G, 0),
        (MAG_ADDRESS, CTRL_REG1_M, 0),
        (MAG_ADDRESS, CTRL_REG2_M, 0),
        (MAG_ADDRESS, CTRL_REG3_M, 0b0000_0011),
        (MAG_ADDRESS, CTRL_REG4_M, 0),
    ];

    /// Output blocks in sample order: accel, gyro, mag.
    pub const OUTPUTS: [(u16, u8); 3] = [
        (ACC_GYR_ADDRESS, OUT_X_L_XL),
        (ACC_GYR_ADDRESS, OUT_X_L_G),
        (MAG_ADDRESS, OUT_X_L_M),
    ];
}

/// LSM9DS1 IMU on a Linux i2c-dev bus (node A).
#[derive(Debug)]
pub struct I2cImu {
    path: PathBuf,
    bus: Option<File>,
    selected: Option<u16>,
}

impl I2cImu {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bus: None,
            selected: None,
        }
    }

    fn bus_err(&self, source: std::io::Error) -> DeviceError {
        DeviceError::Bus {
            device: self.path.display().to_string(),
            source,
        }
    }

    fn select(&mut self, address: u16) -> Result<(), DeviceError> {
        if self.selected == Some(address) {
            return Ok(());
        }
        let fd = self
            .bus
            .as_ref()
            .ok_or_else(|| self.bus_err(ErrorKind::NotConnected.into()))?
            .as_raw_fd();
        // SAFETY: I2C_SLAVE takes the 7-bit address by value; `fd` is an open
        // i2c-dev descriptor owned by `self.bus`.
        let rc = unsafe { libc::ioctl(fd, I2C_SLAVE as _, libc::c_ulong::from(address)) };
        if rc < 0 {
            return Err(self.bus_err(std::io::Error::last_os_error()));
        }
        self.selected = Some(address);
        Ok(())
    }

    fn write_register(&mut self, address: u16, register: u8, value: u8) -> Result<(), DeviceError> {
        self.select(address)?;
        let result = match self.bus.as_mut() {
            Some(bus) => bus.write_all(&[register, value]),
            None => Err(ErrorKind::NotConnected.into()),
        };
        result.map_err(|e| self.bus_err(e))
    }

    fn read_block(&mut self, address: u16, register: u8, out: &mut [u8]) -> Result<(), DeviceError> {
        self.select(address)?;
        let result = match self.bus.as_mut() {
            Some(bus) => bus
                .write_all(&[AUTO_INCREMENT | register])
                .and_then(|()| bus.read(out)),
            None => Err(ErrorKind::NotConnected.into()),
        };
        let got = result.map_err(|e| self.bus_err(e))?;
        if got != out.len() {
            return Err(DeviceError::ShortRead {
                device: self.path.display().to_string(),
                got,
                expected: out.len(),
            });
        }
        Ok(())
    }
}

impl Sensor for I2cImu {
    fn name(&self) -> &str {
        "lsm9ds1"
    }

    fn node(&self) -> Node {
        Node::A
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let bus = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| DeviceError::Open {
                device: self.path.display().to_string(),
                source: e,
            })?;
        self.bus = Some(bus);
        self.selected = None;
        for (address, register, value) in lsm9ds1::SETUP {
            self.write_register(address, register, value)?;
        }
        info!(bus = %self.path.display(), "IMU registers configured");
        Ok(())
    }

    fn sample(&mut self) -> Result<Vec<u8>, DeviceError> {
        let mut data = vec![0u8; IMU_SAMPLE_LEN];
        for (block, (address, register)) in data.chunks_mut(6).zip(lsm9ds1::OUTPUTS) {
            self.read_block(address, register, block)?;
        }
        Ok(data)
    }

    fn shutdown(&mut self) {
        if self.bus.is_none() {
            return;
        }
        for (address, register, value) in lsm9ds1::RESET {
            if let Err(err) = self.write_register(address, register, value) {
                warn!(error = %err, "failed to reset IMU register");
                break;
            }
        }
        self.bus = None;
    }
}

/// How long to wait for one ImP record before declaring the device dead.
const IMP_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// ImP board on a UART (node B).
///
/// Sampling starts with a single `C`; each record is acknowledged with `N`,
/// which also requests the next one.
#[derive(Debug)]
pub struct SerialImp {
    path: PathBuf,
    baud: u32,
    port: Option<File>,
    timeout: Duration,
}

impl SerialImp {
    pub fn new(path: impl Into<PathBuf>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            port: None,
            timeout: IMP_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use an already opened port (a tty or a test pipe).
    pub fn from_port(path: impl AsRef<Path>, port: File) -> Self {
        let mut imp = Self::new(path.as_ref(), 0);
        imp.port = Some(port);
        imp
    }

    fn device(&self) -> String {
        self.path.display().to_string()
    }

    fn send(&mut self, byte: u8) -> Result<(), DeviceError> {
        let device = self.device();
        let port = self.port.as_mut().ok_or_else(|| DeviceError::Bus {
            device: device.clone(),
            source: ErrorKind::NotConnected.into(),
        })?;
        port.write_all(&[byte])
            .map_err(|source| DeviceError::Bus { device, source })?;
        debug!(byte = %char::from(byte), "sent to ImP");
        Ok(())
    }
}

impl Sensor for SerialImp {
    fn name(&self) -> &str {
        "imp"
    }

    fn node(&self) -> Node {
        Node::B
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.port.is_none() {
            let port = open_serial(&self.path, self.baud).map_err(|err| DeviceError::Open {
                device: self.device(),
                source: match err {
                    TransportError::Serial { source, .. } | TransportError::Io(source) => source,
                    other => std::io::Error::other(other.to_string()),
                },
            })?;
            self.port = Some(port);
        }
        self.send(b'C')
    }

    fn sample(&mut self) -> Result<Vec<u8>, DeviceError> {
        let device = self.device();
        let timeout = self.timeout;
        let port = self.port.as_mut().ok_or_else(|| DeviceError::Bus {
            device: device.clone(),
            source: ErrorKind::NotConnected.into(),
        })?;

        let mut record = vec![0u8; IMP_RECORD_LEN];
        let mut filled = 0;
        let deadline = Instant::now() + timeout;
        while filled < IMP_RECORD_LEN {
            match port.read(&mut record[filled..]) {
                Ok(0) => {
                    if Instant::now() >= deadline {
                        return Err(DeviceError::ShortRead {
                            device,
                            got: filled,
                            expected: IMP_RECORD_LEN,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(DeviceError::Timeout {
                            device,
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(source) => return Err(DeviceError::Bus { device, source }),
            }
        }
        self.send(b'N')?;
        Ok(record)
    }

    fn shutdown(&mut self) {
        self.port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn simulated_sample_lengths_follow_node() {
        assert_eq!(
            SimulatedImu::new(Node::A).sample().unwrap().len(),
            IMU_SAMPLE_LEN
        );
        assert_eq!(
            SimulatedImu::new(Node::B).sample().unwrap().len(),
            IMP_RECORD_LEN
        );
    }

    #[test]
    fn simulated_is_deterministic() {
        let mut first = SimulatedImu::new(Node::A);
        let mut second = SimulatedImu::new(Node::A);
        for _ in 0..5 {
            assert_eq!(first.sample().unwrap(), second.sample().unwrap());
        }
    }

    #[test]
    fn simulated_fault_injection() {
        let mut imu = SimulatedImu::new(Node::A).fail_after(2);
        assert!(imu.sample().is_ok());
        assert!(imu.sample().is_ok());
        assert!(matches!(imu.sample(), Err(DeviceError::Injected(2))));
    }

    #[test]
    fn i2c_imu_without_bus_fails_to_start() {
        let mut imu = I2cImu::new("/nonexistent/i2c-9");
        assert!(matches!(imu.start(), Err(DeviceError::Open { .. })));
    }

    fn port_pair() -> (File, UnixStream) {
        let (sensor_side, imp_side) = UnixStream::pair().unwrap();
        sensor_side.set_nonblocking(true).unwrap();
        (File::from(OwnedFd::from(sensor_side)), imp_side)
    }

    #[test]
    fn serial_imp_reads_one_record_and_acknowledges() {
        let (port, mut imp_side) = port_pair();
        let mut imp = SerialImp::from_port("test-imp", port);
        imp.start().unwrap();

        let mut start = [0u8; 1];
        imp_side.read_exact(&mut start).unwrap();
        assert_eq!(&start, b"C");

        let record: Vec<u8> = (1..=IMP_RECORD_LEN as u8).collect();
        imp_side.write_all(&record[..10]).unwrap();
        imp_side.write_all(&record[10..]).unwrap();
        assert_eq!(imp.sample().unwrap(), record);

        let mut ack = [0u8; 1];
        imp_side.read_exact(&mut ack).unwrap();
        assert_eq!(&ack, b"N");
    }

    #[test]
    fn serial_imp_partial_record_is_a_short_read() {
        let (port, mut imp_side) = port_pair();
        let mut imp = SerialImp::from_port("test-imp", port).with_timeout(Duration::from_millis(20));
        imp_side.write_all(&[9; 5]).unwrap();
        drop(imp_side);
        assert!(matches!(
            imp.sample(),
            Err(DeviceError::ShortRead { got: 5, .. })
        ));
    }

    #[test]
    fn serial_imp_times_out_without_data() {
        let (port, _imp_side) = port_pair();
        let mut imp = SerialImp::from_port("silent-imp", port).with_timeout(Duration::from_millis(20));
        assert!(matches!(imp.sample(), Err(DeviceError::Timeout { .. })));
    }
}

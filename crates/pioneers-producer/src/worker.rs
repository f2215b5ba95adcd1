//! The sampling loop that runs inside a producer process.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pioneers_frame::{encode, Node, Packet, ProtocolError};
use pioneers_transport::{Channel, TransportError};
use tracing::{debug, error, info, warn};

use crate::error::DeviceError;
use crate::sensor::Sensor;
use crate::storage::{RotatingFile, DEFAULT_ROTATE_EVERY};

/// Longest single sleep between stop-flag checks.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Where the worker pushes its packets.
pub trait PacketSink {
    fn push(&mut self, packet: &Packet) -> Result<(), TransportError>;
}

impl PacketSink for Channel {
    fn push(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.write_packet(packet)
    }
}

impl PacketSink for Vec<Packet> {
    fn push(&mut self, packet: &Packet) -> Result<(), TransportError> {
        Vec::push(self, *packet);
        Ok(())
    }
}

/// How a worker ended, mapped onto its process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Asked to stop.
    Stopped,
    /// The sensor failed.
    DeviceFault,
    /// The channel to the supervisor is gone or broken.
    ChannelFault,
    /// The backup file could not be written.
    StorageFault,
}

impl WorkerExit {
    pub const fn code(self) -> i32 {
        match self {
            WorkerExit::Stopped => 0,
            WorkerExit::DeviceFault => 10,
            WorkerExit::ChannelFault => 11,
            WorkerExit::StorageFault => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(WorkerExit::Stopped),
            10 => Some(WorkerExit::DeviceFault),
            11 => Some(WorkerExit::ChannelFault),
            12 => Some(WorkerExit::StorageFault),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            WorkerExit::Stopped => "stopped",
            WorkerExit::DeviceFault => "device fault",
            WorkerExit::ChannelFault => "channel fault",
            WorkerExit::StorageFault => "storage fault",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub interval: Duration,
    pub data_dir: PathBuf,
    pub prefix: String,
    pub rotate_every: u32,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let name = name.into();
        Self {
            prefix: name.clone(),
            name,
            interval: Duration::from_millis(100),
            data_dir: data_dir.into(),
            rotate_every: DEFAULT_ROTATE_EVERY,
        }
    }
}

/// Split one sample into its two measurement packets.
///
/// Node A carries 18 register bytes followed by the elapsed time as a
/// big-endian u32; node B's record already holds its own timing.
pub fn frame_sample(
    node: Node,
    index: u16,
    registers: &[u8],
    elapsed_us: u32,
) -> Result<[Packet; 2], ProtocolError> {
    let mut record = registers.to_vec();
    if node == Node::A {
        record.extend_from_slice(&elapsed_us.to_be_bytes());
    }
    let [first_id, second_id] = node.measurement_ids();
    let split = record.len().min(12);
    Ok([
        encode(first_id, index, &record[..split])?,
        encode(second_id, index, &record[split..])?,
    ])
}

/// Sample until `stop` is raised or something breaks.
///
/// Each sample is written to the backup file before any packet is pushed, so
/// a full or slow channel never costs stored data. A full channel drops that
/// sample's packets; a closed one ends the worker.
pub fn run_worker<S, K>(
    sensor: &mut S,
    sink: &mut K,
    config: &WorkerConfig,
    stop: &AtomicBool,
) -> WorkerExit
where
    S: Sensor + ?Sized,
    K: PacketSink + ?Sized,
{
    let node = sensor.node();
    info!(
        producer = %config.name,
        sensor = sensor.name(),
        ?node,
        interval_ms = config.interval.as_millis() as u64,
        "producer starting"
    );

    let mut storage =
        match RotatingFile::new(&config.data_dir, &config.prefix, config.rotate_every) {
            Ok(storage) => storage,
            Err(err) => {
                error!(producer = %config.name, error = %err, fatal = true, "cannot open data directory");
                return WorkerExit::StorageFault;
            }
        };

    if let Err(err) = sensor.start() {
        error!(producer = %config.name, error = %err, fatal = true, "sensor failed to start");
        return WorkerExit::DeviceFault;
    }

    let exit = sample_loop(sensor, sink, config, stop, &mut storage, node);

    sensor.shutdown();
    if let Err(err) = storage.close() {
        warn!(producer = %config.name, error = %err, "failed to close data file");
    }
    info!(producer = %config.name, %exit, "producer finished");
    exit
}

fn sample_loop<S, K>(
    sensor: &mut S,
    sink: &mut K,
    config: &WorkerConfig,
    stop: &AtomicBool,
    storage: &mut RotatingFile,
    node: Node,
) -> WorkerExit
where
    S: Sensor + ?Sized,
    K: PacketSink + ?Sized,
{
    let started = Instant::now();
    let mut index: u16 = 0;
    let mut dropped: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let tick = Instant::now();

        let registers = match sensor.sample() {
            Ok(registers) => registers,
            Err(err) => return device_fault(config, &err),
        };
        // Wraps after ~71 minutes, well past the flight.
        let elapsed_us = started.elapsed().as_micros() as u32;

        if let Err(err) = storage.append(&registers, elapsed_us) {
            error!(producer = %config.name, error = %err, fatal = true, "failed to store sample");
            return WorkerExit::StorageFault;
        }

        let packets = match frame_sample(node, index, &registers, elapsed_us) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(producer = %config.name, error = %err, "failed to encode sample");
                index = index.wrapping_add(1);
                continue;
            }
        };
        for packet in &packets {
            match sink.push(packet) {
                Ok(()) => {}
                Err(TransportError::WouldBlock) => {
                    dropped += 1;
                    debug!(producer = %config.name, index, dropped, "channel full, packet dropped");
                }
                Err(err) => {
                    error!(producer = %config.name, error = %err, "channel to supervisor failed");
                    return WorkerExit::ChannelFault;
                }
            }
        }
        index = index.wrapping_add(1);

        while !stop.load(Ordering::Relaxed) {
            let spent = tick.elapsed();
            if spent >= config.interval {
                break;
            }
            std::thread::sleep((config.interval - spent).min(STOP_POLL));
        }
    }
    WorkerExit::Stopped
}

fn device_fault(config: &WorkerConfig, err: &DeviceError) -> WorkerExit {
    error!(producer = %config.name, error = %err, fatal = true, "sensor failed");
    WorkerExit::DeviceFault
}

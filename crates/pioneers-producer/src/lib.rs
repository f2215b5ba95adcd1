//! Producer processes for the pioneers flight computers.
//!
//! A producer samples one sensor, keeps a rotating plain-text backup of every
//! sample and streams measurement packets to the supervisor over the pipe it
//! was given as stdout. The two halves live here:
//! - supervisor side: [`ProducerHandle`] spawns, polls, checks liveness and stops;
//!   [`ManagedChild`] carries the process lifecycle for children without a
//!   channel
//! - producer side: [`run_worker`] drives a [`Sensor`] into a [`PacketSink`]
//!
//! The exit status is the only fault detail that crosses the process
//! boundary; see [`WorkerExit`].

pub mod error;
pub mod handle;
pub mod process;
pub mod sensor;
pub mod storage;
pub mod worker;

pub use error::{DeviceError, ProcessError, StorageError};
pub use handle::ProducerHandle;
pub use process::{describe_status, Liveness, ManagedChild, ProducerConfig, StopPolicy};
pub use sensor::{I2cImu, Sensor, SerialImp, SimulatedImu, IMP_RECORD_LEN, IMU_SAMPLE_LEN};
pub use storage::{RotatingFile, DEFAULT_ROTATE_EVERY};
pub use worker::{frame_sample, run_worker, PacketSink, WorkerConfig, WorkerExit};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pioneers_frame::Node;
use pioneers_producer::{
    run_worker, I2cImu, Sensor, SerialImp, SimulatedImu, WorkerConfig, WorkerExit,
};
use pioneers_transport::Channel;
use tracing::error;

use crate::cmd::{DeviceArg, ProduceArgs};
use crate::exit::{CliError, CliResult, INTERNAL};

/// Exit status is the worker's [`WorkerExit`] code; the supervisor reads it.
pub fn run(args: ProduceArgs) -> CliResult<i32> {
    let mut sensor = build_sensor(&args);

    let mut channel = match Channel::from_stdout() {
        Ok(channel) => channel,
        Err(err) => {
            error!(producer = %args.name, error = %err, fatal = true, "stdout is not usable as a channel");
            return Ok(WorkerExit::ChannelFault.code());
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    let config = WorkerConfig {
        prefix: args.prefix.clone().unwrap_or_else(|| args.name.clone()),
        interval: Duration::from_millis(args.interval_ms),
        rotate_every: args.rotate_every,
        ..WorkerConfig::new(args.name.clone(), args.data_dir.clone())
    };
    let exit = run_worker(&mut sensor, &mut channel, &config, &stop);
    Ok(exit.code())
}

fn build_sensor(args: &ProduceArgs) -> Box<dyn Sensor> {
    match args.device {
        DeviceArg::Sim => {
            let sensor = SimulatedImu::new(Node::from(args.node));
            Box::new(match args.fail_after {
                Some(samples) => sensor.fail_after(samples),
                None => sensor,
            })
        }
        DeviceArg::I2c => Box::new(I2cImu::new(
            args.path
                .clone()
                .unwrap_or_else(|| PathBuf::from("/dev/i2c-1")),
        )),
        DeviceArg::Imp => Box::new(SerialImp::new(
            args.path
                .clone()
                .unwrap_or_else(|| PathBuf::from("/dev/serial0")),
            args.baud,
        )),
    }
}

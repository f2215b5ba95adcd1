use std::os::unix::process::CommandExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pioneers::clock::SystemClock;
use pioneers::supervisor::{read_flight_mode_strap, Hardware, RunOutcome, Supervisor};
use tracing::{error, info, warn};

use crate::cmd::RunArgs;
use crate::exit::{io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};

pub fn run(args: RunArgs) -> CliResult<i32> {
    let mut config = args.config.load()?;
    let clock = SystemClock::new();

    match read_flight_mode_strap(&config.pins, &config.timing.debounce(), &clock) {
        Ok(Some(on)) => {
            info!(flight_mode = on, "flight-mode strap read");
            config.flight_mode = on;
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "flight-mode strap unreadable, keeping configured mode"),
    }
    if let Some(on) = args.flight_mode {
        config.flight_mode = on;
    }

    let hardware = Hardware::sysfs(&config.pins).map_err(|err| {
        error!(fatal = true, error = %err, "gpio setup failed");
        CliError::new(FAILURE, format!("gpio setup failed: {err}"))
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(stop.clone())?;

    let outcome = {
        let mut supervisor = Supervisor::from_config(&config, clock, hardware);
        supervisor.run(&stop)
    };
    info!(?outcome, "supervisor finished");

    match outcome {
        RunOutcome::Restart => Err(restart()),
        RunOutcome::Stopped | RunOutcome::Reboot | RunOutcome::Shutdown => Ok(SUCCESS),
    }
}

/// Replace this process with the (rebuilt) binary, same arguments.
fn restart() -> CliError {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => return io_error("cannot locate executable", err),
    };
    info!(exe = %exe.display(), "restarting");
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    io_error("restart failed", err)
}

fn install_ctrlc_handler(stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

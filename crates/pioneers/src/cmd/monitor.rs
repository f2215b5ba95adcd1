use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pioneers_frame::{decode, IdClass};
use pioneers_transport::TransportError;
use tracing::{info, warn};

use crate::cmd::{open_link, target_link, ClassArg, MonitorArgs};
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_packet, OutputFormat};

const IDLE_POLL: Duration = Duration::from_millis(5);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut link = open_link(&target_link(&args.target, args.listen, args.baud)?)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let packet = match link.recv() {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                std::thread::sleep(IDLE_POLL);
                continue;
            }
            Err(TransportError::Closed) if args.listen => {
                info!("peer disconnected, waiting for the next one");
                continue;
            }
            Err(TransportError::Closed) => return Ok(SUCCESS),
            Err(err) => return Err(transport_error("receive failed", err)),
        };

        let message = match decode(&packet) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "dropping malformed packet");
                continue;
            }
        };
        if !wanted(args.classes.as_deref(), IdClass::of(message.id)) {
            continue;
        }

        print_packet(&packet, &message, &link.describe(), format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}

fn wanted(filter: Option<&[ClassArg]>, class: IdClass) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.iter().any(|c| {
        matches!(
            (c, class),
            (ClassArg::Measurement, IdClass::Measurement)
                | (ClassArg::Status, IdClass::Status)
                | (ClassArg::Message, IdClass::Message)
                | (ClassArg::Command, IdClass::Command)
        )
    })
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

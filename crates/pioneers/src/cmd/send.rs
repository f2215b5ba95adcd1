use std::time::{Duration, Instant};

use pioneers_frame::{decode, ClearScope, Command, IdClass};
use pioneers_transport::{RemoteLink, TransportError};

use crate::cmd::{open_link, target_link, SendArgs};
use crate::exit::{protocol_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let command = parse_command(&args.command, args.arg.as_deref())?;
    let wait = args.wait.as_deref().map(parse_duration).transpose()?;

    let packet = command
        .to_message(args.index)
        .encode()
        .map_err(|err| protocol_error("encode failed", err))?;

    let mut link = open_link(&target_link(&args.target, false, args.baud)?)?;
    link.send(&packet)
        .map_err(|err| transport_error("send failed", err))?;

    if let Some(wait) = wait {
        print_replies(link.as_mut(), wait, format)?;
    }
    link.close();
    Ok(SUCCESS)
}

/// Print status packets until `wait` elapses or the node hangs up.
fn print_replies(link: &mut dyn RemoteLink, wait: Duration, format: OutputFormat) -> CliResult<()> {
    let deadline = Instant::now() + wait;
    let peer = link.describe();
    while Instant::now() < deadline {
        match link.recv() {
            Ok(Some(packet)) => {
                if let Ok(message) = decode(&packet) {
                    if IdClass::of(message.id) == IdClass::Status {
                        print_packet(&packet, &message, &peer, format);
                    }
                }
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(5)),
            Err(TransportError::Closed) => break,
            Err(err) => return Err(transport_error("receive failed", err)),
        }
    }
    Ok(())
}

fn parse_command(name: &str, arg: Option<&str>) -> CliResult<Command> {
    let usage = |message: String| CliError::new(USAGE, message);
    match name {
        "reboot" => Ok(Command::Reboot),
        "shutdown" => Ok(Command::Shutdown),
        "self-test" | "selftest" => Ok(Command::SelfTest),
        "rebuild" => Ok(Command::RebuildAndRestart),
        "flight-mode" => match arg {
            Some("on" | "1" | "true") => Ok(Command::SetFlightMode(true)),
            Some("off" | "0" | "false") => Ok(Command::SetFlightMode(false)),
            other => Err(usage(format!(
                "flight-mode needs on or off, got {}",
                other.unwrap_or("nothing")
            ))),
        },
        "clear" => arg
            .unwrap_or("all")
            .parse::<ClearScope>()
            .map(Command::ClearFiles)
            .map_err(usage),
        other => Err(usage(format!("unknown command '{other}'"))),
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        assert_eq!(parse_command("reboot", None).unwrap(), Command::Reboot);
        assert_eq!(parse_command("shutdown", None).unwrap(), Command::Shutdown);
        assert_eq!(parse_command("self-test", None).unwrap(), Command::SelfTest);
        assert_eq!(
            parse_command("rebuild", None).unwrap(),
            Command::RebuildAndRestart
        );
        assert_eq!(
            parse_command("flight-mode", Some("on")).unwrap(),
            Command::SetFlightMode(true)
        );
        assert_eq!(
            parse_command("clear", Some("video")).unwrap(),
            Command::ClearFiles(ClearScope::Video)
        );
        assert_eq!(
            parse_command("clear", None).unwrap(),
            Command::ClearFiles(ClearScope::All)
        );
    }

    #[test]
    fn rejects_bad_commands() {
        assert_eq!(parse_command("launch", None).unwrap_err().code, USAGE);
        assert_eq!(parse_command("flight-mode", None).unwrap_err().code, USAGE);
        assert_eq!(parse_command("clear", Some("disk")).unwrap_err().code, USAGE);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}

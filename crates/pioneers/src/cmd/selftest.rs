use std::path::PathBuf;
use std::time::Duration;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pioneers::config::FlightConfig;
use pioneers::gpio::SysfsGpio;
use pioneers::selftest::{self, CheckResult, CheckStatus};
use pioneers::supervisor::link_from_config;
use pioneers_transport::connect_within;
use serde::Serialize;
use tracing::debug;

use crate::cmd::SelftestArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

const LINK_CHECK_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct SelftestOutput {
    node: &'static str,
    checks: Vec<CheckResult>,
    overall: CheckStatus,
}

pub fn run(args: SelftestArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.config.load()?;
    let checks = collect_checks(&config);
    let overall = selftest::overall(&checks);
    let output = SelftestOutput {
        node: pioneers::config::node_arg(config.node),
        checks,
        overall,
    };

    print_selftest(&output, format);

    if overall == CheckStatus::Fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn collect_checks(config: &FlightConfig) -> Vec<CheckResult> {
    let mut checks = selftest::check_storage(&config.storage);

    let gpio = SysfsGpio::new(&config.pins.sysfs_root);
    for (name, pin) in [
        ("LO", config.pins.lift_off),
        ("SOE", config.pins.start_of_experiment),
        ("SODS", config.pins.start_of_data_storage),
    ] {
        checks.push(match gpio.input(pin) {
            Ok(mut input) => selftest::check_input(name, &mut input),
            Err(err) => CheckResult::new(name, CheckStatus::Fail, err.to_string()),
        });
    }

    let mut link = link_from_config(&config.link);
    if let Some(link) = link.as_mut() {
        if let Err(err) = connect_within(link.as_mut(), LINK_CHECK_WAIT) {
            debug!(link = %link.describe(), error = %err, "link check could not connect");
        }
    }
    checks.push(selftest::check_link(link.as_deref()));

    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("pioneers"));
    for spec in config.producers() {
        checks.push(selftest::check_producer(&spec, &exe));
    }
    checks
}

fn print_selftest(output: &SelftestOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHECK", "STATUS", "DETAIL"]);
            for c in &output.checks {
                table.add_row(vec![
                    c.name.clone(),
                    c.status.as_str().to_string(),
                    c.detail.clone(),
                ]);
            }
            println!("{table}");
            println!("overall: {}", output.overall.as_str());
        }
        OutputFormat::Pretty => {
            println!("pioneers selftest (node {})\n", output.node);
            for c in &output.checks {
                println!("  [{:>4}] {:<22} {}", c.status.as_str(), c.name, c.detail);
            }
            println!("\n  Result: {}", output.overall.as_str());
        }
        OutputFormat::Raw => {
            println!("{}", output.overall.as_str().to_ascii_lowercase());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_serializes_overall_status() {
        let output = SelftestOutput {
            node: "a",
            checks: vec![CheckResult::new("data", CheckStatus::Pass, "ok")],
            overall: CheckStatus::Warn,
        };
        let json = serde_json::to_string(&output).expect("selftest output should serialize");
        assert!(json.contains("\"overall\":\"warn\""));
        assert!(json.contains("\"status\":\"pass\""));
    }
}

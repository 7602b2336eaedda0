use std::path::Path;

use serde::Serialize;
use twosafe_command::CommandRegistry;

use crate::cmd::{socket_path, DoctorArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    socket: String,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let socket = socket_path(args.socket);
    let checks = vec![
        platform_transport_check(),
        temp_dir_writable_check(),
        endpoint_state_check(&socket),
        registered_verbs_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput {
        socket: socket.display().to_string(),
        checks,
        overall,
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let rows = output
                .checks
                .iter()
                .map(|c| {
                    vec![
                        status_text(c.status).to_string(),
                        c.name.clone(),
                        c.detail.clone(),
                    ]
                })
                .collect();
            print_table(&["STATUS", "CHECK", "DETAIL"], rows);
        }
        OutputFormat::Pretty => {
            println!("twosafe doctor ({})\n", output.socket);
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
    }
}

fn platform_transport_check() -> CheckResult {
    #[cfg(unix)]
    {
        CheckResult {
            name: "platform_transport".to_string(),
            status: CheckStatus::Pass,
            detail: "Unix domain sockets available".to_string(),
        }
    }

    #[cfg(not(unix))]
    {
        CheckResult {
            name: "platform_transport".to_string(),
            status: CheckStatus::Fail,
            detail: "twosafe requires Unix domain sockets".to_string(),
        }
    }
}

fn temp_dir_writable_check() -> CheckResult {
    let temp_dir = std::env::temp_dir();
    let probe_path = temp_dir.join(format!("twosafe-doctor-{}.sock", std::process::id()));

    // Dropping the endpoint removes the probe socket again.
    match twosafe_transport::Endpoint::bind(&probe_path) {
        Ok(_) => CheckResult {
            name: "temp_dir_writable".to_string(),
            status: CheckStatus::Pass,
            detail: format!("{} socket bind succeeded", temp_dir.display()),
        },
        Err(err) => CheckResult {
            name: "temp_dir_writable".to_string(),
            status: CheckStatus::Fail,
            detail: format!("{} socket bind failed: {err}", temp_dir.display()),
        },
    }
}

fn endpoint_state_check(socket: &Path) -> CheckResult {
    use twosafe_transport::EndpointState;

    let name = "endpoint_state".to_string();
    match twosafe_transport::probe(socket) {
        Ok(state @ EndpointState::Live) => CheckResult {
            name,
            status: CheckStatus::Pass,
            detail: format!("{}: daemon is listening", state.as_str()),
        },
        Ok(state @ EndpointState::Absent) => CheckResult {
            name,
            status: CheckStatus::Info,
            detail: format!("{}: daemon is not running", state.as_str()),
        },
        Ok(state @ EndpointState::Stale) => CheckResult {
            name,
            status: CheckStatus::Warn,
            detail: format!(
                "{}: leftover socket file, removed on next serve",
                state.as_str()
            ),
        },
        Ok(state @ EndpointState::NotSocket) => CheckResult {
            name,
            status: CheckStatus::Fail,
            detail: format!(
                "{}: path is occupied by a non-socket file; remove it manually",
                state.as_str()
            ),
        },
        Err(err) => CheckResult {
            name,
            status: CheckStatus::Fail,
            detail: format!("probe failed: {err}"),
        },
    }
}

fn registered_verbs_check() -> CheckResult {
    CheckResult {
        name: "registered_verbs".to_string(),
        status: CheckStatus::Info,
        detail: CommandRegistry::with_builtins().verbs().join(", "),
    }
}

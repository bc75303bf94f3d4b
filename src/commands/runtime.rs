//! Handlers for the human-facing subcommands. Parsing and presentation live
//! here; the lifecycle semantics live in `services::orchestrator`.

use crate::cli::{Cli, Commands};
use crate::domain::errors::{ProError, Result};
use crate::domain::models::ApplicationStatus;
use crate::services::context::Context;
use crate::services::orchestrator::{self, DisableOptions, EnableOptions, LockPolicy, Outcome};
use crate::services::output::{envelope, print_envelope, OutputFormat};
use crate::services::registry::Registry;
use crate::services::state::{self, FileContractClient};
use serde::Serialize;

pub fn handle_runtime_commands(cli: &Cli, ctx: &Context, registry: &Registry) -> Result<i32> {
    let emit_progress = cli.format.is_none();
    match &cli.command {
        Commands::Enable {
            service,
            variant,
            access_only,
        } => {
            let opts = EnableOptions {
                service: service.clone(),
                variant: variant.clone(),
                access_only: *access_only,
                emit_progress,
                lock: LockPolicy::default(),
            };
            let outcome = orchestrator::enable(ctx, registry, &opts)?;
            respond(cli.format, "EnableService", outcome, |data| {
                let mut lines = vec![];
                for name in &data.enabled {
                    lines.push(format!("{} enabled", name));
                }
                lines.extend(data.messages.iter().cloned());
                if data.reboot_required {
                    lines.push("A system reboot is required.".to_string());
                }
                lines
            })
        }
        Commands::Disable { service, purge } => {
            let opts = DisableOptions {
                service: service.clone(),
                purge: *purge,
                emit_progress,
                lock: LockPolicy::default(),
            };
            let outcome = orchestrator::disable(ctx, registry, &opts)?;
            respond(cli.format, "DisableService", outcome, |data| {
                data.disabled
                    .iter()
                    .map(|name| format!("{} disabled", name))
                    .collect()
            })
        }
        Commands::Attach {
            token,
            no_auto_enable,
        } => {
            let outcome = orchestrator::full_token_attach(
                ctx,
                registry,
                &FileContractClient,
                token,
                !no_auto_enable,
                &LockPolicy::default(),
            )?;
            respond(cli.format, "FullTokenAttach", outcome, |data| {
                let mut lines = vec!["This machine is now attached.".to_string()];
                for name in &data.enabled {
                    lines.push(format!("{} enabled", name));
                }
                if data.reboot_required {
                    lines.push("A system reboot is required.".to_string());
                }
                lines
            })
        }
        Commands::Detach => {
            let outcome = orchestrator::detach(ctx, registry, &LockPolicy::default())?;
            respond(cli.format, "Detach", outcome, |data| {
                let mut lines: Vec<String> = data
                    .disabled
                    .iter()
                    .map(|name| format!("{} disabled", name))
                    .collect();
                lines.push("This machine is now detached.".to_string());
                lines
            })
        }
        Commands::Status => {
            let report = state::refresh_status_cache(ctx, registry)?;
            respond(cli.format, "Status", Outcome::from_data(report), |data| {
                let mut lines = vec![match &data.contract_name {
                    Some(name) => format!("Attached to: {}", name),
                    None => "Not attached.".to_string(),
                }];
                lines.push(format!("{:<18} {:<10} {}", "SERVICE", "ENTITLED", "STATUS"));
                for row in &data.services {
                    let status = match row.status {
                        ApplicationStatus::Enabled => "enabled",
                        ApplicationStatus::EnabledWarning => "warning",
                        ApplicationStatus::Disabled => "disabled",
                    };
                    lines.push(format!(
                        "{:<18} {:<10} {}",
                        row.name,
                        if row.entitled { "yes" } else { "no" },
                        status
                    ));
                }
                lines
            })
        }
        Commands::Api { .. } => unreachable!("api commands are routed separately"),
    }
}

fn respond<T: Serialize>(
    format: Option<OutputFormat>,
    data_type: &str,
    outcome: Outcome<T>,
    text: impl Fn(&T) -> Vec<String>,
) -> Result<i32> {
    match format {
        Some(format) => {
            let response = envelope(data_type, &outcome.data, outcome.errors, outcome.warnings)?;
            print_envelope(&response, format)?;
            Ok(if response.succeeded() { 0 } else { 1 })
        }
        None => {
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning.title);
            }
            for error in &outcome.errors {
                eprintln!("error: {}", error.title);
            }
            for line in text(&outcome.data) {
                println!("{}", line);
            }
            Ok(if outcome.errors.is_empty() { 0 } else { 1 })
        }
    }
}

/// Render a ProError the way the selected format expects: an error envelope
/// on stdout for machine formats, plain text on stderr otherwise.
pub fn report_error(err: &ProError, format: Option<OutputFormat>, data_type: &str) -> i32 {
    match format {
        Some(format) => {
            let response = crate::services::output::error_envelope(data_type, err);
            // Falling back to stderr if serialization of the envelope itself
            // fails is all that is left to do.
            if print_envelope(&response, format).is_err() {
                eprintln!("{}", err);
            }
        }
        None => eprintln!("{}", err),
    }
    err.exit_code()
}

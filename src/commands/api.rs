//! The `pro api` surface. Endpoints are versioned and their envelope is a
//! contract: this layer never panics and never prints anything but the
//! envelope, whatever the engine throws at it.

use crate::domain::errors::{ProError, Result};
use crate::domain::models::ApiResponse;
use crate::services::context::Context;
use crate::services::orchestrator::{self, DisableOptions, EnableOptions, LockPolicy, Outcome};
use crate::services::output::{envelope, error_envelope, print_envelope, OutputFormat};
use crate::services::registry::Registry;
use crate::services::state::FileContractClient;
use serde_json::{Map, Value};

pub fn handle_api_command(
    ctx: &Context,
    registry: &Registry,
    endpoint: &str,
    data: Option<&str>,
    args: &[String],
) -> Result<i32> {
    let format = OutputFormat::Json;
    let response = match parse_arguments(endpoint, data, args)
        .and_then(|fields| dispatch(ctx, registry, endpoint, &fields))
    {
        Ok(response) => response,
        Err(err) => error_envelope(endpoint_data_type(endpoint), &err),
    };
    print_envelope(&response, format)?;
    Ok(if response.succeeded() { 0 } else { 1 })
}

/// Merge `--data` (a JSON object) and repeated `--args key=value` pairs.
/// Explicit `--args` win. Bare `true`/`false` values become booleans.
fn parse_arguments(
    endpoint: &str,
    data: Option<&str>,
    args: &[String],
) -> Result<Map<String, Value>> {
    let mut fields = match data {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(ProError::ApiMissingArgument {
                    arg: "data (must be a JSON object)".to_string(),
                    endpoint: endpoint.to_string(),
                })
            }
        },
        None => Map::new(),
    };
    for pair in args {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ProError::ApiMissingArgument {
                arg: format!("{} (expected key=value)", pair),
                endpoint: endpoint.to_string(),
            });
        };
        let value = match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        };
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

fn dispatch(
    ctx: &Context,
    registry: &Registry,
    endpoint: &str,
    fields: &Map<String, Value>,
) -> Result<ApiResponse> {
    match endpoint {
        "u.pro.services.enable.v1" => {
            let opts = EnableOptions {
                service: required_str(fields, "service", endpoint)?,
                variant: optional_str(fields, "variant"),
                access_only: flag(fields, "access_only"),
                emit_progress: false,
                lock: LockPolicy::default(),
            };
            let outcome = orchestrator::enable(ctx, registry, &opts)?;
            respond("EnableService", outcome)
        }
        "u.pro.services.disable.v1" => {
            let opts = DisableOptions {
                service: required_str(fields, "service", endpoint)?,
                purge: flag(fields, "purge"),
                emit_progress: false,
                lock: LockPolicy::default(),
            };
            let outcome = orchestrator::disable(ctx, registry, &opts)?;
            respond("DisableService", outcome)
        }
        "u.pro.services.dependencies.v1" => {
            let result = orchestrator::dependencies(registry);
            respond("ServiceDependencies", Outcome::from_data(result))
        }
        "u.pro.detach.v1" => {
            let outcome = orchestrator::detach(ctx, registry, &LockPolicy::default())?;
            respond("Detach", outcome)
        }
        "u.pro.attach.token.full_token_attach.v1" => {
            let token = required_str(fields, "token", endpoint)?;
            let auto_enable = fields
                .get("auto_enable")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            let outcome = orchestrator::full_token_attach(
                ctx,
                registry,
                &FileContractClient,
                &token,
                auto_enable,
                &LockPolicy::default(),
            )?;
            respond("FullTokenAttach", outcome)
        }
        "u.pro.status.is_attached.v1" => {
            let result = orchestrator::is_attached(ctx)?;
            respond("IsAttached", Outcome::from_data(result))
        }
        "u.pro.status.enabled_services.v1" => {
            let result = orchestrator::enabled_services(ctx, registry)?;
            respond("EnabledServices", Outcome::from_data(result))
        }
        other => Err(ProError::ApiNoSuchEndpoint {
            endpoint: other.to_string(),
        }),
    }
}

fn respond<T: serde::Serialize>(data_type: &str, outcome: Outcome<T>) -> Result<ApiResponse> {
    envelope(data_type, &outcome.data, outcome.errors, outcome.warnings)
}

fn endpoint_data_type(endpoint: &str) -> &'static str {
    match endpoint {
        "u.pro.services.enable.v1" => "EnableService",
        "u.pro.services.disable.v1" => "DisableService",
        "u.pro.services.dependencies.v1" => "ServiceDependencies",
        "u.pro.detach.v1" => "Detach",
        "u.pro.attach.token.full_token_attach.v1" => "FullTokenAttach",
        "u.pro.status.is_attached.v1" => "IsAttached",
        "u.pro.status.enabled_services.v1" => "EnabledServices",
        _ => "APIResponse",
    }
}

fn required_str(fields: &Map<String, Value>, key: &str, endpoint: &str) -> Result<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProError::ApiMissingArgument {
            arg: key.to_string(),
            endpoint: endpoint.to_string(),
        })
}

fn optional_str(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

fn flag(fields: &Map<String, Value>, key: &str) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_override_data_and_parse_booleans() {
        let fields = parse_arguments(
            "u.pro.services.enable.v1",
            Some(r#"{"service": "usg", "access_only": false}"#),
            &["access_only=true".to_string(), "variant=generic".to_string()],
        )
        .unwrap();
        assert_eq!(fields["service"], "usg");
        assert_eq!(fields["access_only"], Value::Bool(true));
        assert_eq!(fields["variant"], "generic");
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let err = parse_arguments("e", Some("[1,2]"), &[]).unwrap_err();
        assert_eq!(err.code(), "api-missing-argument");
        let err = parse_arguments("e", None, &["noequals".to_string()]).unwrap_err();
        assert_eq!(err.code(), "api-missing-argument");
    }
}

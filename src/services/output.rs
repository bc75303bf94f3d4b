//! Output plumbing: step progress for long operations and the versioned
//! response envelope shared by every endpoint and by `--format json|yaml`.

use crate::domain::errors::ProError;
use crate::domain::models::{ApiData, ApiResponse, ErrorWarningObject};
use crate::services::config::Config;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;

pub const SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

/// Counts steps of a multi-step operation and optionally narrates them on
/// stderr, keeping stdout clean for the structured payload.
pub struct Progress {
    total_steps: usize,
    done_steps: usize,
    previous_step_message: Option<String>,
    current_step_message: Option<String>,
    emit: bool,
}

impl Progress {
    pub fn new(total_steps: usize, emit: bool) -> Self {
        Self {
            total_steps,
            done_steps: 0,
            previous_step_message: None,
            current_step_message: None,
            emit,
        }
    }

    pub fn step(&mut self, message: &str) {
        self.done_steps += 1;
        self.previous_step_message = self.current_step_message.take();
        if let Some(previous) = &self.previous_step_message {
            log::debug!("completed: {}", previous);
        }
        self.current_step_message = Some(message.to_string());
        log::info!("({}/{}) {}", self.done_steps, self.total_steps, message);
        if self.emit {
            eprintln!("({}/{}) {}", self.done_steps, self.total_steps, message);
        }
    }

    pub fn done_steps(&self) -> usize {
        self.done_steps
    }
}

fn environment_vars_meta() -> serde_json::Value {
    let vars: Vec<serde_json::Value> = Config::environment_overrides()
        .into_iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    json!({ "environment_vars": vars })
}

pub fn error_object(err: &ProError) -> ErrorWarningObject {
    ErrorWarningObject {
        title: err.to_string(),
        code: err.code().to_string(),
        meta: err.meta(),
    }
}

pub fn warning_object(title: &str, code: &str, meta: serde_json::Value) -> ErrorWarningObject {
    ErrorWarningObject {
        title: title.to_string(),
        code: code.to_string(),
        meta,
    }
}

/// Assemble the envelope. `result` is `failure` exactly when there are
/// errors; warnings alone do not fail an operation.
pub fn envelope<T: Serialize>(
    data_type: &str,
    attributes: &T,
    errors: Vec<ErrorWarningObject>,
    warnings: Vec<ErrorWarningObject>,
) -> Result<ApiResponse, ProError> {
    let result = if errors.is_empty() {
        "success"
    } else {
        "failure"
    };
    Ok(ApiResponse {
        schema_version: SCHEMA_VERSION.to_string(),
        result: result.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        errors,
        warnings,
        data: ApiData {
            data_type: data_type.to_string(),
            attributes: serde_json::to_value(attributes)?,
            meta: environment_vars_meta(),
        },
    })
}

/// Error-only envelope for operations that failed before producing data.
pub fn error_envelope(data_type: &str, err: &ProError) -> ApiResponse {
    ApiResponse {
        schema_version: SCHEMA_VERSION.to_string(),
        result: "failure".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        errors: vec![error_object(err)],
        warnings: vec![],
        data: ApiData {
            data_type: data_type.to_string(),
            attributes: json!({}),
            meta: environment_vars_meta(),
        },
    }
}

pub fn print_envelope(response: &ApiResponse, format: OutputFormat) -> Result<(), ProError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(response)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_is_failure_exactly_when_errors_are_present() {
        let ok = envelope("TestResponse", &json!({"x": 1}), vec![], vec![]).unwrap();
        assert!(ok.succeeded());

        let warned = envelope(
            "TestResponse",
            &json!({}),
            vec![],
            vec![warning_object("careful", "test-warning", json!({}))],
        )
        .unwrap();
        assert!(warned.succeeded());

        let failed = error_envelope("TestResponse", &ProError::Unattached);
        assert!(!failed.succeeded());
        assert_eq!(failed.errors[0].code, "unattached");
    }

    #[test]
    fn progress_counts_steps() {
        let mut p = Progress::new(2, false);
        p.step("one");
        p.step("two");
        assert_eq!(p.done_steps(), 2);
    }
}

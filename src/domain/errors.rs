use serde_json::json;
use thiserror::Error;

/// Operation errors surfaced to callers. Every variant maps to a stable
/// machine-readable code in the response envelope plus a distinct exit code,
/// so automation can react to the kind without parsing the title text.
#[derive(Debug, Error)]
pub enum ProError {
    #[error("This command must be run as root (try using sudo).")]
    NonRootUser,

    #[error("This machine is not attached to an Ubuntu Pro subscription.")]
    Unattached,

    #[error("Cannot find service '{name}' in the catalog.")]
    EntitlementNotFound { name: String },

    #[error("Unable to perform: {lock_request}. Operation in progress: {lock_holder} (pid:{pid})")]
    LockHeld {
        lock_request: String,
        lock_holder: String,
        pid: i32,
    },

    #[error("Could not enable {service}: {reason}")]
    EntitlementNotEnabled { service: String, reason: String },

    #[error("Could not disable {service}: {reason}")]
    EntitlementNotDisabled { service: String, reason: String },

    #[error("Cannot enable {service} while the incompatible service(s) {} are enabled.", incompatible.join(", "))]
    IncompatibleServicesDetected {
        service: String,
        incompatible: Vec<String>,
    },

    #[error("{name} is a beta service; enable features.allow_beta or set PRO_ALLOW_BETA=1 to use it.")]
    BetaServiceFound { name: String },

    #[error("Cannot disable {service} while dependent service(s) {} are enabled.", dependents.join(", "))]
    CanDisableFailure {
        service: String,
        dependents: Vec<String>,
    },

    #[error("Invalid contract token: {detail}")]
    InvalidToken { detail: String },

    #[error("This machine is already attached to '{contract}'.")]
    AlreadyAttached { contract: String },

    #[error("No endpoint found with the name '{endpoint}'.")]
    ApiNoSuchEndpoint { endpoint: String },

    #[error("Missing argument '{arg}' for endpoint {endpoint}.")]
    ApiMissingArgument { arg: String, endpoint: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ProError {
    /// Stable code used in the envelope. Unclassified errors get a
    /// `generic-` prefixed code derived from the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonRootUser => "non-root-user",
            Self::Unattached => "unattached",
            Self::EntitlementNotFound { .. } => "entitlement-not-found",
            Self::LockHeld { .. } => "lock-held",
            Self::EntitlementNotEnabled { .. } => "entitlement-not-enabled",
            Self::EntitlementNotDisabled { .. } => "entitlement-not-disabled",
            Self::IncompatibleServicesDetected { .. } => "incompatible-services-detected",
            Self::BetaServiceFound { .. } => "beta-service-found",
            Self::CanDisableFailure { .. } => "can-disable-failure",
            Self::InvalidToken { .. } => "invalid-token",
            Self::AlreadyAttached { .. } => "already-attached",
            Self::ApiNoSuchEndpoint { .. } => "api-no-such-endpoint",
            Self::ApiMissingArgument { .. } => "api-missing-argument",
            Self::Io(_) => "generic-io-error",
            Self::Json(_) => "generic-json-error",
            Self::Yaml(_) => "generic-yaml-error",
        }
    }

    /// Free-form attribution data for the envelope, commonly the service name.
    pub fn meta(&self) -> serde_json::Value {
        match self {
            Self::EntitlementNotFound { name } | Self::BetaServiceFound { name } => {
                json!({ "service": name })
            }
            Self::LockHeld {
                lock_holder, pid, ..
            } => json!({ "lock_holder": lock_holder, "pid": pid }),
            Self::EntitlementNotEnabled { service, reason }
            | Self::EntitlementNotDisabled { service, reason } => {
                json!({ "service": service, "reason": reason })
            }
            Self::IncompatibleServicesDetected {
                service,
                incompatible,
            } => json!({ "service": service, "incompatible_services": incompatible }),
            Self::CanDisableFailure {
                service,
                dependents,
            } => json!({
                "service": service,
                "dependent_services": dependents,
            }),
            Self::AlreadyAttached { contract } => json!({ "contract": contract }),
            Self::ApiNoSuchEndpoint { endpoint } => json!({ "endpoint": endpoint }),
            Self::ApiMissingArgument { arg, endpoint } => {
                json!({ "argument": arg, "endpoint": endpoint })
            }
            _ => json!({}),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NonRootUser => 3,
            Self::Unattached => 4,
            Self::EntitlementNotFound { .. } => 5,
            Self::LockHeld { .. } => 6,
            Self::EntitlementNotEnabled { .. } => 7,
            Self::EntitlementNotDisabled { .. } => 8,
            Self::IncompatibleServicesDetected { .. } => 9,
            Self::BetaServiceFound { .. } => 10,
            Self::CanDisableFailure { .. } => 11,
            Self::InvalidToken { .. } => 12,
            Self::AlreadyAttached { .. } => 13,
            Self::ApiNoSuchEndpoint { .. } => 14,
            Self::ApiMissingArgument { .. } => 15,
            Self::Io(_) | Self::Json(_) | Self::Yaml(_) => 1,
        }
    }
}

pub type Result<T, E = ProError> = std::result::Result<T, E>;

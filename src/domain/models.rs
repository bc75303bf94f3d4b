use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Machine-readable reason attached to a dependency or incompatibility edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: String,
    pub title: String,
}

impl Reason {
    pub fn new(code: &str, title: &str) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
        }
    }
}

/// An edge in the static service graph: the named service plus why the edge exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceWithReason {
    pub name: String,
    pub reason: Reason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceVariant {
    pub name: String,
    pub title: String,
}

/// How a service is delivered on the host. A closed set of behaviors instead of
/// one type per service: the per-service differences are data, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceKind {
    /// Adds an apt repository and optionally installs packages from it.
    Repository {
        repo_url: String,
        key_file: String,
        packages: Vec<String>,
    },
    /// Installs packages from already-configured sources.
    Packages { packages: Vec<String> },
    /// Driven entirely by an external tool (e.g. canonical-livepatch).
    ExternalTool { tool: String },
}

/// Host-compatibility constraints. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAffordances {
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub series: Vec<String>,
    #[serde(default)]
    pub min_kernel: Option<String>,
}

/// Static catalog entry for one service. Immutable once the registry is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub is_beta: bool,
    /// Enabling or disabling this service changes the running kernel.
    #[serde(default)]
    pub affects_kernel: bool,
    pub kind: ServiceKind,
    #[serde(default)]
    pub affordances: ServiceAffordances,
    /// Services that must be enabled before this one.
    #[serde(default)]
    pub requires: Vec<ServiceWithReason>,
    /// Services that cannot be active at the same time as this one.
    /// Declared one-directionally; enforced symmetrically at runtime.
    #[serde(default)]
    pub incompatible: Vec<ServiceWithReason>,
    #[serde(default)]
    pub variants: Vec<ServiceVariant>,
    #[serde(default)]
    pub default_variant: Option<String>,
    #[serde(default)]
    pub post_enable_messages: Vec<String>,
}

impl ServiceDescriptor {
    pub fn has_variant(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v.name == variant)
    }

    pub fn packages(&self) -> &[String] {
        match &self.kind {
            ServiceKind::Repository { packages, .. } => packages,
            ServiceKind::Packages { packages } => packages,
            ServiceKind::ExternalTool { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Enabled,
    /// Active but degraded, e.g. repository configured while its packages are
    /// not installed.
    EnabledWarning,
    Disabled,
}

impl ApplicationStatus {
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled | Self::EnabledWarning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicabilityStatus {
    Applicable,
    Inapplicable,
}

/// One currently-enabled service, as observed on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledService {
    pub name: String,
    pub variant_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Operation results (the `attributes` payload of each endpoint)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
pub struct EnableResult {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    pub reboot_required: bool,
    pub messages: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct DisableResult {
    pub disabled: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct DetachResult {
    pub disabled: Vec<String>,
    pub reboot_required: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct FullTokenAttachResult {
    pub enabled: Vec<String>,
    pub reboot_required: bool,
}

#[derive(Debug, Serialize)]
pub struct IsAttachedResult {
    pub is_attached: bool,
    pub contract_status: String,
}

#[derive(Debug, Serialize)]
pub struct EnabledServicesResult {
    pub enabled_services: Vec<EnabledService>,
}

#[derive(Debug, Serialize)]
pub struct ServiceWithDependencies {
    pub name: String,
    pub incompatible_with: Vec<ServiceWithReason>,
    pub depends_on: Vec<ServiceWithReason>,
}

#[derive(Debug, Serialize)]
pub struct DependenciesResult {
    pub services: Vec<ServiceWithDependencies>,
}

/// Row of `pro status` output.
#[derive(Debug, Serialize)]
pub struct ServiceStatusRow {
    pub name: String,
    pub entitled: bool,
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub attached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    pub services: Vec<ServiceStatusRow>,
}

// ---------------------------------------------------------------------------
// Machine token (the durable attachment state)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractEntitlement {
    pub entitled: bool,
    #[serde(default)]
    pub auto_enable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineToken {
    pub contract_id: String,
    pub contract_name: String,
    #[serde(default)]
    pub account_name: Option<String>,
    pub entitlements: BTreeMap<String, ContractEntitlement>,
}

impl MachineToken {
    pub fn is_entitled(&self, service: &str) -> bool {
        self.entitlements
            .get(service)
            .map(|e| e.entitled)
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// API response envelope (stable JSON shape shared by every endpoint)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWarningObject {
    pub title: String,
    pub code: String,
    pub meta: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ApiData {
    #[serde(rename = "type")]
    pub data_type: String,
    pub attributes: serde_json::Value,
    pub meta: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    #[serde(rename = "_schema_version")]
    pub schema_version: String,
    pub result: String,
    pub version: String,
    pub errors: Vec<ErrorWarningObject>,
    pub warnings: Vec<ErrorWarningObject>,
    pub data: ApiData,
}

impl ApiResponse {
    pub fn succeeded(&self) -> bool {
        self.result == "success"
    }
}

//! A service bound to a live context. The descriptor says what the service
//! is; an `Entitlement` knows how to probe it on this host, decide whether it
//! may change state, and perform the change through the host seams.

use crate::domain::models::{
    ApplicabilityStatus, ApplicationStatus, MachineToken, ServiceDescriptor, ServiceKind,
    ServiceWithReason,
};
use crate::services::context::Context;
use crate::services::output::Progress;
use crate::services::registry::Registry;
use crate::services::resolver;
use anyhow::bail;

/// Why a service may not be enabled right now.
#[derive(Debug)]
pub enum CanEnableFailure {
    AlreadyEnabled,
    NotEntitled,
    Inapplicable(String),
    IsBeta,
    MissingRequirements(Vec<ServiceWithReason>),
    IncompatibleServices(Vec<ServiceWithReason>),
}

impl CanEnableFailure {
    pub fn message(&self, service: &str) -> String {
        match self {
            Self::AlreadyEnabled => format!("{} is already enabled.", service),
            Self::NotEntitled => {
                format!("{} is not entitled on this subscription.", service)
            }
            Self::Inapplicable(reason) => reason.clone(),
            Self::IsBeta => format!("{} is in beta.", service),
            Self::MissingRequirements(missing) => format!(
                "{} requires {} to be enabled first.",
                service,
                missing
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Self::IncompatibleServices(blocking) => format!(
                "{} conflicts with enabled service(s) {}.",
                service,
                blocking
                    .iter()
                    .map(|b| b.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Why a service may not be disabled right now.
#[derive(Debug)]
pub enum CanDisableFailure {
    AlreadyDisabled,
    ActiveDependents(Vec<String>),
}

pub struct Entitlement<'a> {
    ctx: &'a Context,
    desc: &'a ServiceDescriptor,
    variant: Option<String>,
    access_only: bool,
    purge: bool,
}

impl<'a> Entitlement<'a> {
    pub fn new(
        ctx: &'a Context,
        desc: &'a ServiceDescriptor,
        variant: Option<String>,
        access_only: bool,
        purge: bool,
    ) -> Self {
        Self {
            ctx,
            desc,
            variant,
            access_only,
            purge,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        self.desc
    }

    /// The variant explicitly requested, if any.
    pub fn variant(&self) -> Option<&str> {
        self.variant.as_deref()
    }

    /// The variant that will actually be configured: the requested one, or the
    /// catalog default when the service has variants and none was requested.
    pub fn effective_variant(&self) -> Option<&str> {
        if self.desc.variants.is_empty() {
            return None;
        }
        self.variant
            .as_deref()
            .or(self.desc.default_variant.as_deref())
    }

    /// True when no variant was requested but one will be selected anyway.
    pub fn variant_auto_selected(&self) -> bool {
        self.variant.is_none() && self.effective_variant().is_some()
    }

    pub fn application_status(&self) -> ApplicationStatus {
        match &self.desc.kind {
            ServiceKind::Repository { packages, .. } => {
                if !self.ctx.packages.repository_configured(&self.desc.name) {
                    ApplicationStatus::Disabled
                } else if packages
                    .iter()
                    .all(|p| self.ctx.packages.is_installed(p))
                {
                    ApplicationStatus::Enabled
                } else {
                    ApplicationStatus::EnabledWarning
                }
            }
            ServiceKind::Packages { packages } => {
                if !packages.is_empty()
                    && packages.iter().all(|p| self.ctx.packages.is_installed(p))
                {
                    ApplicationStatus::Enabled
                } else {
                    ApplicationStatus::Disabled
                }
            }
            ServiceKind::ExternalTool { tool } => {
                if self.ctx.tools.tool_active(tool) {
                    ApplicationStatus::Enabled
                } else {
                    ApplicationStatus::Disabled
                }
            }
        }
    }

    /// The variant currently configured on the host, if the service is
    /// repository-backed and was enabled with one.
    pub fn enabled_variant(&self) -> Option<String> {
        self.ctx.packages.repository_variant(&self.desc.name)
    }

    /// True when the service is active and this request would not change
    /// anything: no variant requested, or the requested variant is the one
    /// already configured. Switching variants is a real enable.
    pub fn is_already_enabled(&self) -> bool {
        self.application_status().is_enabled()
            && (self.variant.is_none() || self.variant() == self.enabled_variant().as_deref())
    }

    pub fn applicability_status(&self) -> (ApplicabilityStatus, Option<String>) {
        let aff = &self.desc.affordances;
        if !aff.architectures.is_empty() {
            let arch = host_architecture();
            if !aff.architectures.iter().any(|a| a == &arch) {
                return (
                    ApplicabilityStatus::Inapplicable,
                    Some(format!(
                        "{} is not available on {} (supported: {}).",
                        self.desc.name,
                        arch,
                        aff.architectures.join(", ")
                    )),
                );
            }
        }
        if !aff.series.is_empty() {
            if let Some(series) = host_series() {
                if !aff.series.iter().any(|s| s == &series) {
                    return (
                        ApplicabilityStatus::Inapplicable,
                        Some(format!(
                            "{} is not available on Ubuntu {}.",
                            self.desc.name, series
                        )),
                    );
                }
            }
        }
        if let Some(min) = &aff.min_kernel {
            if let Some(kernel) = host_kernel() {
                if !kernel_at_least(&kernel, min) {
                    return (
                        ApplicabilityStatus::Inapplicable,
                        Some(format!(
                            "{} requires kernel {} or newer (running {}).",
                            self.desc.name, min, kernel
                        )),
                    );
                }
            }
        }
        (ApplicabilityStatus::Applicable, None)
    }

    /// All preconditions for enabling, checked in a fixed order so callers get
    /// the most actionable failure first.
    pub fn can_enable(
        &self,
        registry: &Registry,
        token: &MachineToken,
        enabled: &[String],
    ) -> Result<(), CanEnableFailure> {
        if self.is_already_enabled() {
            return Err(CanEnableFailure::AlreadyEnabled);
        }
        if !token.is_entitled(&self.desc.name) {
            return Err(CanEnableFailure::NotEntitled);
        }
        let (applicability, reason) = self.applicability_status();
        if applicability == ApplicabilityStatus::Inapplicable {
            return Err(CanEnableFailure::Inapplicable(
                reason.unwrap_or_else(|| "not applicable to this host".to_string()),
            ));
        }
        if self.desc.is_beta && !self.ctx.cfg.features.allow_beta {
            return Err(CanEnableFailure::IsBeta);
        }
        let missing = resolver::missing_required_services(self.desc, enabled);
        if !missing.is_empty() {
            return Err(CanEnableFailure::MissingRequirements(missing));
        }
        let blocking = resolver::blocking_incompatible_services(registry, self.desc, enabled);
        if !blocking.is_empty() {
            return Err(CanEnableFailure::IncompatibleServices(blocking));
        }
        Ok(())
    }

    pub fn can_disable(
        &self,
        registry: &Registry,
        enabled: &[String],
        ignore_dependents: bool,
    ) -> Result<(), CanDisableFailure> {
        if !self.application_status().is_enabled() {
            return Err(CanDisableFailure::AlreadyDisabled);
        }
        if !ignore_dependents {
            let dependents = resolver::blocking_dependents(registry, &self.desc.name, enabled);
            if !dependents.is_empty() {
                return Err(CanDisableFailure::ActiveDependents(dependents));
            }
        }
        Ok(())
    }

    pub fn calculate_total_enable_steps(&self) -> usize {
        match &self.desc.kind {
            ServiceKind::Repository { packages, .. } => {
                if self.access_only || packages.is_empty() {
                    1
                } else {
                    2
                }
            }
            ServiceKind::Packages { .. } | ServiceKind::ExternalTool { .. } => 1,
        }
    }

    pub fn calculate_total_disable_steps(&self) -> usize {
        match &self.desc.kind {
            ServiceKind::Repository { packages, .. } => {
                if self.purge && !packages.is_empty() {
                    2
                } else {
                    1
                }
            }
            ServiceKind::Packages { .. } | ServiceKind::ExternalTool { .. } => 1,
        }
    }

    pub fn enable(&self, progress: &mut Progress) -> anyhow::Result<()> {
        match &self.desc.kind {
            ServiceKind::Repository {
                repo_url,
                key_file,
                packages,
            } => {
                progress.step(&format!("Configuring {} access", self.desc.title));
                self.ctx.packages.configure_repository(
                    &self.desc.name,
                    repo_url,
                    key_file,
                    self.effective_variant(),
                )?;
                if !self.access_only && !packages.is_empty() {
                    progress.step(&format!("Installing {} packages", self.desc.title));
                    self.ctx.packages.install(packages)?;
                }
            }
            ServiceKind::Packages { packages } => {
                if self.access_only {
                    bail!("--access-only is not supported for {}", self.desc.name);
                }
                progress.step(&format!("Installing {} packages", self.desc.title));
                self.ctx.packages.install(packages)?;
            }
            ServiceKind::ExternalTool { tool } => {
                if self.access_only {
                    bail!("--access-only is not supported for {}", self.desc.name);
                }
                progress.step(&format!("Enabling {}", self.desc.title));
                self.ctx.tools.enable_tool(tool)?;
            }
        }
        Ok(())
    }

    pub fn disable(&self, progress: &mut Progress) -> anyhow::Result<()> {
        match &self.desc.kind {
            ServiceKind::Repository { packages, .. } => {
                progress.step(&format!("Removing {} access", self.desc.title));
                self.ctx.packages.remove_repository(&self.desc.name)?;
                if self.purge && !packages.is_empty() {
                    progress.step(&format!("Removing {} packages", self.desc.title));
                    self.ctx.packages.remove(packages)?;
                }
            }
            ServiceKind::Packages { packages } => {
                progress.step(&format!("Removing {} packages", self.desc.title));
                self.ctx.packages.remove(packages)?;
            }
            ServiceKind::ExternalTool { tool } => {
                progress.step(&format!("Disabling {}", self.desc.title));
                self.ctx.tools.disable_tool(tool)?;
            }
        }
        Ok(())
    }
}

fn host_architecture() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

fn host_series() -> Option<String> {
    let raw = std::fs::read_to_string("/etc/os-release").ok()?;
    raw.lines().find_map(|line| {
        line.strip_prefix("VERSION_CODENAME=")
            .map(|v| v.trim_matches('"').to_string())
    })
}

fn host_kernel() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .ok()
        .map(|s| s.trim().to_string())
}

/// Compare kernel release strings on their leading major.minor components.
fn kernel_at_least(running: &str, minimum: &str) -> bool {
    fn major_minor(v: &str) -> (u64, u64) {
        let mut parts = v
            .split(|c: char| !c.is_ascii_digit())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u64>().unwrap_or(0));
        (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
    }
    major_minor(running) >= major_minor(minimum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ContractEntitlement;
    use crate::services::host::testing::MemoryBackend;
    use crate::services::output::Progress;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn token(entitled: &[&str]) -> MachineToken {
        MachineToken {
            contract_id: "cid".to_string(),
            contract_name: "test-contract".to_string(),
            account_name: None,
            entitlements: entitled
                .iter()
                .map(|name| {
                    (
                        name.to_string(),
                        ContractEntitlement {
                            entitled: true,
                            auto_enable: false,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        }
    }

    struct Fixture {
        registry: Registry,
        backend: Rc<MemoryBackend>,
        ctx: Context,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Rc::new(MemoryBackend::default());
        let ctx = Context::for_testing(tmp.path().to_path_buf(), backend.clone(), true);
        Fixture {
            registry: Registry::default(),
            backend,
            ctx,
            _tmp: tmp,
        }
    }

    #[test]
    fn enable_repository_service_configures_repo_and_installs_packages() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "usg", None, false, false)
            .unwrap();
        let mut progress = Progress::new(ent.calculate_total_enable_steps(), false);
        ent.enable(&mut progress).unwrap();
        assert!(f.backend.repos.borrow().contains_key("usg"));
        assert!(f.backend.packages.borrow().contains("usg"));
        assert_eq!(ent.application_status(), ApplicationStatus::Enabled);
    }

    #[test]
    fn access_only_skips_package_installation() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "usg", None, true, false)
            .unwrap();
        let mut progress = Progress::new(1, false);
        ent.enable(&mut progress).unwrap();
        assert!(f.backend.repos.borrow().contains_key("usg"));
        assert!(!f.backend.packages.borrow().contains("usg"));
        assert_eq!(ent.application_status(), ApplicationStatus::EnabledWarning);
    }

    #[test]
    fn disable_with_purge_removes_packages_too() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "usg", None, false, true)
            .unwrap();
        let mut progress = Progress::new(2, false);
        ent.enable(&mut progress).unwrap();
        ent.disable(&mut progress).unwrap();
        assert!(!f.backend.repos.borrow().contains_key("usg"));
        assert!(!f.backend.packages.borrow().contains("usg"));
    }

    #[test]
    fn tool_backed_service_goes_through_the_tool_runner() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "livepatch", None, false, false)
            .unwrap();
        let mut progress = Progress::new(1, false);
        ent.enable(&mut progress).unwrap();
        assert!(f.backend.tools.borrow().contains("canonical-livepatch"));
        assert_eq!(ent.application_status(), ApplicationStatus::Enabled);
        ent.disable(&mut progress).unwrap();
        assert_eq!(ent.application_status(), ApplicationStatus::Disabled);
    }

    #[test]
    fn can_enable_reports_missing_requirements_before_incompatibilities() {
        let f = fixture();
        let token = token(&["ros", "esm-infra", "esm-apps"]);
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "ros", None, false, false)
            .unwrap();
        match ent.can_enable(&f.registry, &token, &["esm-infra".to_string()]) {
            Err(CanEnableFailure::MissingRequirements(missing)) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].name, "esm-apps");
            }
            other => panic!("expected missing requirements, got {:?}", other),
        }
        assert!(ent
            .can_enable(
                &f.registry,
                &token,
                &["esm-infra".to_string(), "esm-apps".to_string()]
            )
            .is_ok());
    }

    #[test]
    fn can_enable_rejects_an_already_enabled_service() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "usg", None, false, false)
            .unwrap();
        ent.enable(&mut Progress::new(2, false)).unwrap();
        assert!(matches!(
            ent.can_enable(&f.registry, &token(&["usg"]), &["usg".to_string()]),
            Err(CanEnableFailure::AlreadyEnabled)
        ));
    }

    #[test]
    fn switching_variants_is_not_a_redundant_enable() {
        let mut f = fixture();
        f.ctx.cfg.features.allow_beta = true;
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "realtime-kernel", None, false, false)
            .unwrap();
        ent.enable(&mut Progress::new(2, false)).unwrap();
        let enabled = vec!["realtime-kernel".to_string()];

        let same = f
            .registry
            .entitlement_factory(&f.ctx, "realtime-kernel", Some("generic"), false, false)
            .unwrap();
        assert!(matches!(
            same.can_enable(&f.registry, &token(&["realtime-kernel"]), &enabled),
            Err(CanEnableFailure::AlreadyEnabled)
        ));

        let switched = f
            .registry
            .entitlement_factory(&f.ctx, "realtime-kernel", Some("intel-iotg"), false, false)
            .unwrap();
        assert!(switched
            .can_enable(&f.registry, &token(&["realtime-kernel"]), &enabled)
            .is_ok());
    }

    #[test]
    fn can_enable_rejects_unentitled_and_beta_services() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "usg", None, false, false)
            .unwrap();
        assert!(matches!(
            ent.can_enable(&f.registry, &token(&[]), &[]),
            Err(CanEnableFailure::NotEntitled)
        ));

        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "anbox-cloud", None, false, false)
            .unwrap();
        assert!(matches!(
            ent.can_enable(&f.registry, &token(&["anbox-cloud"]), &[]),
            Err(CanEnableFailure::IsBeta)
        ));
    }

    #[test]
    fn can_disable_blocks_on_enabled_dependents() {
        let f = fixture();
        for name in ["esm-infra", "esm-apps"] {
            let ent = f
                .registry
                .entitlement_factory(&f.ctx, name, None, false, false)
                .unwrap();
            ent.enable(&mut Progress::new(1, false)).unwrap();
        }
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "esm-infra", None, false, false)
            .unwrap();
        let enabled = vec!["esm-infra".to_string(), "esm-apps".to_string()];
        match ent.can_disable(&f.registry, &enabled, false) {
            Err(CanDisableFailure::ActiveDependents(deps)) => assert_eq!(deps, ["esm-apps"]),
            other => panic!("expected active dependents, got {:?}", other),
        }
        assert!(ent.can_disable(&f.registry, &enabled, true).is_ok());
    }

    #[test]
    fn default_variant_is_auto_selected_when_none_requested() {
        let f = fixture();
        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "realtime-kernel", None, false, false)
            .unwrap();
        assert!(ent.variant_auto_selected());
        assert_eq!(ent.effective_variant(), Some("generic"));

        let ent = f
            .registry
            .entitlement_factory(&f.ctx, "realtime-kernel", Some("intel-iotg"), false, false)
            .unwrap();
        assert!(!ent.variant_auto_selected());
        assert_eq!(ent.effective_variant(), Some("intel-iotg"));
    }

    #[test]
    fn kernel_comparison_uses_major_minor_only() {
        assert!(kernel_at_least("5.15.0-91-generic", "5.4"));
        assert!(kernel_at_least("5.4.0-26-generic", "5.4"));
        assert!(!kernel_at_least("4.15.0-20-generic", "5.4"));
        assert!(kernel_at_least("6.1.0", "5.15"));
    }
}

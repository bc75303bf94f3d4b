//! Lifecycle orchestration: every mutating operation goes root check, then
//! attachment check, then the no-op fast path, and only then takes the lock.
//! The lock is always released, the operation notice always cleared, and the
//! status cache always refreshed, success or failure.

use crate::domain::errors::{ProError, Result};
use crate::domain::models::{
    DependenciesResult, DetachResult, DisableResult, EnableResult, EnabledServicesResult,
    ErrorWarningObject, FullTokenAttachResult, IsAttachedResult, MachineToken,
};
use crate::services::context::Context;
use crate::services::entitlement::{CanDisableFailure, CanEnableFailure, Entitlement};
use crate::services::lock::{LockFile, LOCK_MAX_RETRIES, LOCK_RETRY_SLEEP};
use crate::services::output::{error_object, warning_object, Progress};
use crate::services::registry::Registry;
use crate::services::resolver;
use crate::services::state;
use serde_json::json;
use std::time::Duration;

/// Operation payload plus the error and warning records that belong in the
/// envelope. `errors` non-empty means the operation (partially) failed.
#[derive(Debug)]
pub struct Outcome<T> {
    pub data: T,
    pub errors: Vec<ErrorWarningObject>,
    pub warnings: Vec<ErrorWarningObject>,
}

impl<T> Outcome<T> {
    pub fn from_data(data: T) -> Self {
        Self {
            data,
            errors: vec![],
            warnings: vec![],
        }
    }
}

/// How long to wait on a lock held by another client.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub max_retries: u32,
    pub sleep: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_retries: LOCK_MAX_RETRIES,
            sleep: LOCK_RETRY_SLEEP,
        }
    }
}

impl LockPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            sleep: Duration::ZERO,
        }
    }
}

pub struct EnableOptions {
    pub service: String,
    pub variant: Option<String>,
    pub access_only: bool,
    pub emit_progress: bool,
    pub lock: LockPolicy,
}

impl EnableOptions {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            variant: None,
            access_only: false,
            emit_progress: false,
            lock: LockPolicy::default(),
        }
    }
}

pub struct DisableOptions {
    pub service: String,
    pub purge: bool,
    pub emit_progress: bool,
    pub lock: LockPolicy,
}

impl DisableOptions {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            purge: false,
            emit_progress: false,
            lock: LockPolicy::default(),
        }
    }
}

pub fn enable(
    ctx: &Context,
    registry: &Registry,
    opts: &EnableOptions,
) -> Result<Outcome<EnableResult>> {
    require_root(ctx)?;
    let token = state::require_attached(ctx)?;
    let ent = registry.entitlement_factory(
        ctx,
        &opts.service,
        opts.variant.as_deref(),
        opts.access_only,
        false,
    )?;

    // Re-enabling an already-enabled service is a no-op and must not contend
    // for the lock. A different requested variant is a real change, though.
    if ent.is_already_enabled() {
        return Ok(Outcome::from_data(EnableResult {
            enabled: vec![],
            disabled: vec![],
            reboot_required: state::reboot_required(ctx),
            messages: vec![format!("{} is already enabled.", ent.name())],
        }));
    }

    let holder = format!("pro.enable.{}", ent.name());
    let guard = LockFile::new(ctx.lock_path(), &holder)
        .acquire(opts.lock.max_retries, opts.lock.sleep)?;
    state::add_notice(ctx, &state::operation_notice(&holder))?;

    let run = run_enable(ctx, registry, &ent, &token, opts.emit_progress);

    state::remove_notice(ctx, &state::operation_notice(&holder))?;
    guard.release()?;
    run
}

/// The enable sequence proper: precondition check, host mutation, state
/// bookkeeping. The caller holds the operation lock.
fn run_enable(
    ctx: &Context,
    registry: &Registry,
    ent: &Entitlement<'_>,
    token: &MachineToken,
    emit_progress: bool,
) -> Result<Outcome<EnableResult>> {
    let before = state::enabled_service_names(ctx, registry);
    ent.can_enable(registry, token, &before)
        .map_err(|failure| enable_failure_to_error(ent, failure))?;

    let mut warnings = vec![];
    if ent.variant_auto_selected() {
        let variant = ent.effective_variant().unwrap_or_default().to_string();
        warnings.push(warning_object(
            &format!(
                "No variant requested for {}; defaulting to '{}'.",
                ent.name(),
                variant
            ),
            "auto-selected-variant",
            json!({ "service": ent.name(), "variant": variant }),
        ));
    }

    let mut progress = Progress::new(ent.calculate_total_enable_steps(), emit_progress);
    ent.enable(&mut progress)
        .map_err(|err| ProError::EntitlementNotEnabled {
            service: ent.name().to_string(),
            reason: err.to_string(),
        })?;

    if ent.descriptor().affects_kernel {
        state::mark_reboot_required(ctx)?;
    }
    state::refresh_status_cache(ctx, registry)?;

    let after = state::enabled_service_names(ctx, registry);
    Ok(Outcome {
        data: EnableResult {
            enabled: diff(&after, &before),
            disabled: diff(&before, &after),
            reboot_required: state::reboot_required(ctx),
            messages: ent.descriptor().post_enable_messages.clone(),
        },
        errors: vec![],
        warnings,
    })
}

pub fn disable(
    ctx: &Context,
    registry: &Registry,
    opts: &DisableOptions,
) -> Result<Outcome<DisableResult>> {
    require_root(ctx)?;
    state::require_attached(ctx)?;
    let ent = registry.entitlement_factory(ctx, &opts.service, None, false, opts.purge)?;

    let before = state::enabled_service_names(ctx, registry);
    ent.can_disable(registry, &before, false)
        .map_err(|failure| match failure {
            CanDisableFailure::AlreadyDisabled => ProError::EntitlementNotDisabled {
                service: ent.name().to_string(),
                reason: "it is not currently enabled".to_string(),
            },
            CanDisableFailure::ActiveDependents(dependents) => ProError::CanDisableFailure {
                service: ent.name().to_string(),
                dependents,
            },
        })?;

    let holder = format!("pro.disable.{}", ent.name());
    let guard = LockFile::new(ctx.lock_path(), &holder)
        .acquire(opts.lock.max_retries, opts.lock.sleep)?;
    state::add_notice(ctx, &state::operation_notice(&holder))?;

    let mut progress = Progress::new(ent.calculate_total_disable_steps(), opts.emit_progress);
    let run = ent.disable(&mut progress);

    state::remove_notice(ctx, &state::operation_notice(&holder))?;
    guard.release()?;

    run.map_err(|err| ProError::EntitlementNotDisabled {
        service: ent.name().to_string(),
        reason: err.to_string(),
    })?;

    if ent.descriptor().affects_kernel {
        state::mark_reboot_required(ctx)?;
    }
    state::refresh_status_cache(ctx, registry)?;

    let after = state::enabled_service_names(ctx, registry);
    Ok(Outcome::from_data(DisableResult {
        disabled: diff(&before, &after),
    }))
}

/// Disable everything and drop the machine token. Best-effort: a service that
/// refuses to disable becomes a warning, and so does failed notice
/// bookkeeping, so the machine always ends up detached.
pub fn detach(
    ctx: &Context,
    registry: &Registry,
    lock: &LockPolicy,
) -> Result<Outcome<DetachResult>> {
    require_root(ctx)?;
    if !state::is_attached(ctx)? {
        return Ok(Outcome::from_data(DetachResult::default()));
    }

    let holder = "pro.detach";
    let guard = LockFile::new(ctx.lock_path(), holder).acquire(lock.max_retries, lock.sleep)?;

    let mut disabled = vec![];
    let mut warnings = vec![];
    if let Err(err) = state::add_notice(ctx, &state::operation_notice(holder)) {
        warnings.push(error_object(&err));
    }
    for name in registry.entitlements_disable_order() {
        let ent = registry.entitlement_factory(ctx, name, None, false, false)?;
        if !ent.application_status().is_enabled() {
            continue;
        }
        let mut progress = Progress::new(ent.calculate_total_disable_steps(), false);
        match ent.disable(&mut progress) {
            Ok(()) => {
                disabled.push(name.clone());
                if ent.descriptor().affects_kernel {
                    if let Err(err) = state::mark_reboot_required(ctx) {
                        warnings.push(error_object(&err));
                    }
                }
            }
            Err(err) => warnings.push(warning_object(
                &format!("Could not disable {}: {}", name, err),
                "entitlement-not-disabled",
                json!({ "service": name }),
            )),
        }
    }

    state::delete_machine_token(ctx)?;
    if let Err(err) = state::remove_notice(ctx, &state::operation_notice(holder)) {
        warnings.push(error_object(&err));
    }
    guard.release()?;
    state::refresh_status_cache(ctx, registry)?;

    disabled.sort();
    Ok(Outcome {
        data: DetachResult {
            disabled,
            reboot_required: state::reboot_required(ctx),
        },
        errors: vec![],
        warnings,
    })
}

/// Attach with a complete machine token, then auto-enable the entitled
/// services the contract marks for it. The token write and the whole
/// auto-enable pass run under one lock acquisition; nothing else may mutate
/// the host between two auto-enables. A service that cannot be enabled is
/// recorded and skipped; its dependents then fail their own requirement
/// check and are recorded too.
pub fn full_token_attach(
    ctx: &Context,
    registry: &Registry,
    client: &dyn state::ContractClient,
    token: &str,
    auto_enable: bool,
    lock: &LockPolicy,
) -> Result<Outcome<FullTokenAttachResult>> {
    require_root(ctx)?;
    if let Some(existing) = state::machine_token(ctx)? {
        return Err(ProError::AlreadyAttached {
            contract: existing.contract_name,
        });
    }
    let machine_token = client.exchange_token(token)?;

    let holder = "pro.attach";
    let guard = LockFile::new(ctx.lock_path(), holder).acquire(lock.max_retries, lock.sleep)?;
    state::add_notice(ctx, &state::operation_notice(holder))?;
    state::write_machine_token(ctx, &machine_token)?;

    let mut enabled = vec![];
    let mut errors = vec![];
    let mut warnings = vec![];
    if auto_enable {
        let requested: Vec<String> = machine_token
            .entitlements
            .iter()
            .filter(|(_, e)| e.entitled && e.auto_enable)
            .map(|(name, _)| name.clone())
            .collect();
        // A contract newer than this client may name services we do not know.
        let (known, unknown) = registry.get_valid_entitlement_names(&requested);
        for name in unknown {
            warnings.push(warning_object(
                &format!("The contract enables {}, which this client does not know.", name),
                "entitlement-not-found",
                json!({ "service": name }),
            ));
        }
        for name in registry.order_entitlements_for_enabling(&known) {
            let run = registry
                .entitlement_factory(ctx, &name, None, false, false)
                .and_then(|ent| {
                    if ent.is_already_enabled() {
                        return Ok(Outcome::from_data(EnableResult::default()));
                    }
                    run_enable(ctx, registry, &ent, &machine_token, false)
                });
            match run {
                Ok(outcome) => {
                    enabled.extend(outcome.data.enabled);
                    warnings.extend(outcome.warnings);
                }
                Err(err) => errors.push(error_object(&err)),
            }
        }
    }

    state::remove_notice(ctx, &state::operation_notice(holder))?;
    guard.release()?;
    state::refresh_status_cache(ctx, registry)?;
    enabled.sort();
    Ok(Outcome {
        data: FullTokenAttachResult {
            enabled,
            reboot_required: state::reboot_required(ctx),
        },
        errors,
        warnings,
    })
}

pub fn dependencies(registry: &Registry) -> DependenciesResult {
    resolver::dependencies_dump(registry)
}

pub fn is_attached(ctx: &Context) -> Result<IsAttachedResult> {
    let token = state::machine_token(ctx)?;
    Ok(IsAttachedResult {
        is_attached: token.is_some(),
        contract_status: if token.is_some() { "active" } else { "none" }.to_string(),
    })
}

pub fn enabled_services(ctx: &Context, registry: &Registry) -> Result<EnabledServicesResult> {
    Ok(EnabledServicesResult {
        enabled_services: state::enabled_services(ctx, registry),
    })
}

fn require_root(ctx: &Context) -> Result<()> {
    if ctx.can_mutate_host() {
        Ok(())
    } else {
        Err(ProError::NonRootUser)
    }
}

fn enable_failure_to_error(ent: &Entitlement<'_>, failure: CanEnableFailure) -> ProError {
    match failure {
        CanEnableFailure::IsBeta => ProError::BetaServiceFound {
            name: ent.name().to_string(),
        },
        CanEnableFailure::IncompatibleServices(blocking) => {
            ProError::IncompatibleServicesDetected {
                service: ent.name().to_string(),
                incompatible: blocking.into_iter().map(|b| b.name).collect(),
            }
        }
        other => ProError::EntitlementNotEnabled {
            service: ent.name().to_string(),
            reason: other.message(ent.name()),
        },
    }
}

/// Names in `left` that are not in `right`, sorted. Both inputs are small.
fn diff(left: &[String], right: &[String]) -> Vec<String> {
    let mut out: Vec<String> = left
        .iter()
        .filter(|n| !right.contains(n))
        .cloned()
        .collect();
    out.sort();
    out
}

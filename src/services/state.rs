//! Durable client state: the machine token written at attach time, the
//! notices list, the reboot marker, and the cached status report.

use crate::domain::errors::{ProError, Result};
use crate::domain::models::{
    EnabledService, MachineToken, ServiceStatusRow, StatusReport,
};
use crate::services::context::Context;
use crate::services::entitlement::Entitlement;
use crate::services::registry::Registry;
use std::collections::BTreeSet;
use std::path::Path;

pub const OPERATION_IN_PROGRESS_PREFIX: &str = "Operation in progress: ";
pub const REBOOT_REQUIRED_NOTICE: &str = "System reboot required";

/// Exchanges a contract token for a machine token. The production client
/// resolves tokens locally; the trait keeps a seam for a networked contract
/// server later.
pub trait ContractClient {
    fn exchange_token(&self, token: &str) -> Result<MachineToken>;
}

/// Offline contract resolution: the token is either an inline JSON machine
/// token or a path to a file containing one. Suits air-gapped hosts where the
/// token document is delivered out of band.
pub struct FileContractClient;

impl ContractClient for FileContractClient {
    fn exchange_token(&self, token: &str) -> Result<MachineToken> {
        let raw = if token.trim_start().starts_with('{') {
            token.to_string()
        } else {
            std::fs::read_to_string(token).map_err(|err| ProError::InvalidToken {
                detail: format!("cannot read token file {}: {}", token, err),
            })?
        };
        serde_json::from_str(&raw).map_err(|err| ProError::InvalidToken {
            detail: format!("malformed machine token: {}", err),
        })
    }
}

pub fn machine_token(ctx: &Context) -> Result<Option<MachineToken>> {
    let path = ctx.machine_token_path();
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// The machine token, or `Unattached` when there is none.
pub fn require_attached(ctx: &Context) -> Result<MachineToken> {
    machine_token(ctx)?.ok_or(ProError::Unattached)
}

pub fn is_attached(ctx: &Context) -> Result<bool> {
    Ok(machine_token(ctx)?.is_some())
}

pub fn write_machine_token(ctx: &Context, token: &MachineToken) -> Result<()> {
    std::fs::write(
        ctx.machine_token_path(),
        serde_json::to_string_pretty(token)?,
    )?;
    Ok(())
}

pub fn delete_machine_token(ctx: &Context) -> Result<()> {
    remove_if_present(&ctx.machine_token_path())
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

fn read_notices(ctx: &Context) -> Vec<String> {
    std::fs::read_to_string(ctx.notices_path())
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn write_notices(ctx: &Context, notices: &[String]) -> Result<()> {
    std::fs::write(ctx.notices_path(), serde_json::to_string_pretty(notices)?)?;
    Ok(())
}

pub fn add_notice(ctx: &Context, notice: &str) -> Result<()> {
    let mut notices = read_notices(ctx);
    if !notices.iter().any(|n| n == notice) {
        notices.push(notice.to_string());
        notices.sort();
        write_notices(ctx, &notices)?;
    }
    Ok(())
}

pub fn remove_notice(ctx: &Context, notice: &str) -> Result<()> {
    let mut notices = read_notices(ctx);
    let before = notices.len();
    notices.retain(|n| n != notice);
    if notices.len() != before {
        write_notices(ctx, &notices)?;
    }
    Ok(())
}

pub fn has_notice(ctx: &Context, notice: &str) -> bool {
    read_notices(ctx).iter().any(|n| n == notice)
}

pub fn operation_notice(holder: &str) -> String {
    format!("{}{}", OPERATION_IN_PROGRESS_PREFIX, holder)
}

pub fn reboot_required(ctx: &Context) -> bool {
    has_notice(ctx, REBOOT_REQUIRED_NOTICE)
}

pub fn mark_reboot_required(ctx: &Context) -> Result<()> {
    add_notice(ctx, REBOOT_REQUIRED_NOTICE)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Live probe of which services are enabled right now, in catalog order.
pub fn enabled_services(ctx: &Context, registry: &Registry) -> Vec<EnabledService> {
    registry
        .services()
        .iter()
        .filter_map(|desc| {
            let ent = Entitlement::new(ctx, desc, None, false, false);
            if !ent.application_status().is_enabled() {
                return None;
            }
            let variant = ent.enabled_variant();
            Some(EnabledService {
                name: desc.name.clone(),
                variant_enabled: variant.is_some(),
                variant_name: variant,
            })
        })
        .collect()
}

/// Enabled service names as a sorted list, the shape the resolver wants.
pub fn enabled_service_names(ctx: &Context, registry: &Registry) -> Vec<String> {
    let names: BTreeSet<String> = enabled_services(ctx, registry)
        .into_iter()
        .map(|s| s.name)
        .collect();
    names.into_iter().collect()
}

/// Recompute the full status report and persist it to the status cache.
pub fn refresh_status_cache(ctx: &Context, registry: &Registry) -> Result<StatusReport> {
    let token = machine_token(ctx)?;
    let services = registry
        .services()
        .iter()
        .map(|desc| {
            let ent = Entitlement::new(ctx, desc, None, false, false);
            ServiceStatusRow {
                name: desc.name.clone(),
                entitled: token
                    .as_ref()
                    .map(|t| t.is_entitled(&desc.name))
                    .unwrap_or(false),
                status: ent.application_status(),
                variant: ent.enabled_variant(),
            }
        })
        .collect();
    let report = StatusReport {
        attached: token.is_some(),
        contract_name: token.map(|t| t.contract_name),
        services,
    };
    std::fs::write(
        ctx.status_cache_path(),
        serde_json::to_string_pretty(&report)?,
    )?;
    Ok(report)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ContractEntitlement;
    use crate::services::host::testing::MemoryBackend;
    use crate::services::output::Progress;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn test_ctx() -> (Context, Rc<MemoryBackend>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Rc::new(MemoryBackend::default());
        let ctx = Context::for_testing(tmp.path().to_path_buf(), backend.clone(), true);
        (ctx, backend, tmp)
    }

    fn sample_token() -> MachineToken {
        MachineToken {
            contract_id: "cid-1".to_string(),
            contract_name: "Acme Pro".to_string(),
            account_name: Some("acme".to_string()),
            entitlements: BTreeMap::from([(
                "esm-infra".to_string(),
                ContractEntitlement {
                    entitled: true,
                    auto_enable: true,
                },
            )]),
        }
    }

    #[test]
    fn machine_token_roundtrip_and_attachment_state() {
        let (ctx, _, _tmp) = test_ctx();
        assert!(!is_attached(&ctx).unwrap());
        assert!(matches!(
            require_attached(&ctx).unwrap_err(),
            ProError::Unattached
        ));
        write_machine_token(&ctx, &sample_token()).unwrap();
        assert!(is_attached(&ctx).unwrap());
        assert_eq!(require_attached(&ctx).unwrap().contract_name, "Acme Pro");
        delete_machine_token(&ctx).unwrap();
        assert!(!is_attached(&ctx).unwrap());
        // Deleting twice is fine.
        delete_machine_token(&ctx).unwrap();
    }

    #[test]
    fn inline_json_token_is_accepted_and_garbage_is_rejected() {
        let token = serde_json::to_string(&sample_token()).unwrap();
        let parsed = FileContractClient.exchange_token(&token).unwrap();
        assert_eq!(parsed.contract_id, "cid-1");

        let err = FileContractClient.exchange_token("not json").unwrap_err();
        assert_eq!(err.code(), "invalid-token");
    }

    #[test]
    fn token_file_path_is_read_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        std::fs::write(&path, serde_json::to_string(&sample_token()).unwrap()).unwrap();
        let parsed = FileContractClient
            .exchange_token(path.to_str().unwrap())
            .unwrap();
        assert_eq!(parsed.contract_name, "Acme Pro");
    }

    #[test]
    fn notices_deduplicate_and_remove_cleanly() {
        let (ctx, _, _tmp) = test_ctx();
        add_notice(&ctx, "n1").unwrap();
        add_notice(&ctx, "n1").unwrap();
        add_notice(&ctx, "n2").unwrap();
        assert!(has_notice(&ctx, "n1"));
        assert_eq!(read_notices(&ctx), ["n1", "n2"]);
        remove_notice(&ctx, "n1").unwrap();
        assert!(!has_notice(&ctx, "n1"));
        assert!(has_notice(&ctx, "n2"));
    }

    #[test]
    fn enabled_services_reports_variants() {
        let (ctx, _, _tmp) = test_ctx();
        let registry = Registry::default();
        assert!(enabled_services(&ctx, &registry).is_empty());

        let ent = registry
            .entitlement_factory(&ctx, "realtime-kernel", Some("intel-iotg"), false, false)
            .unwrap();
        ent.enable(&mut Progress::new(2, false)).unwrap();
        let ent = registry
            .entitlement_factory(&ctx, "esm-infra", None, false, false)
            .unwrap();
        ent.enable(&mut Progress::new(1, false)).unwrap();

        let enabled = enabled_services(&ctx, &registry);
        assert_eq!(enabled.len(), 2);
        let realtime = enabled.iter().find(|s| s.name == "realtime-kernel").unwrap();
        assert!(realtime.variant_enabled);
        assert_eq!(realtime.variant_name.as_deref(), Some("intel-iotg"));
        let infra = enabled.iter().find(|s| s.name == "esm-infra").unwrap();
        assert!(!infra.variant_enabled);
    }

    #[test]
    fn status_cache_reflects_attachment_and_service_state() {
        let (ctx, _, _tmp) = test_ctx();
        let registry = Registry::default();
        write_machine_token(&ctx, &sample_token()).unwrap();
        let report = refresh_status_cache(&ctx, &registry).unwrap();
        assert!(report.attached);
        assert_eq!(report.contract_name.as_deref(), Some("Acme Pro"));
        let infra = report.services.iter().find(|s| s.name == "esm-infra").unwrap();
        assert!(infra.entitled);
        assert!(!infra.status.is_enabled());
        assert!(ctx.status_cache_path().exists());
    }
}

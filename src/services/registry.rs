//! Static catalog of every known service and the deterministic orders used to
//! process them. The catalog is data; malformed catalogs (unknown edge targets,
//! unsatisfiable require cycles) are programmer errors and panic at build time.

use crate::domain::errors::{ProError, Result};
use crate::domain::models::{
    Reason, ServiceAffordances, ServiceDescriptor, ServiceKind, ServiceVariant, ServiceWithReason,
};
use crate::services::context::Context;
use crate::services::entitlement::Entitlement;
use std::collections::{BTreeMap, BTreeSet};

pub struct Registry {
    services: Vec<ServiceDescriptor>,
    index: BTreeMap<String, usize>,
    /// Derived inverse of the `requires` graph: name -> services that require it.
    dependents: BTreeMap<String, Vec<String>>,
    enable_order: Vec<String>,
    disable_order: Vec<String>,
}

impl Registry {
    pub fn with_catalog(services: Vec<ServiceDescriptor>) -> Self {
        let index: BTreeMap<String, usize> = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        assert_eq!(index.len(), services.len(), "duplicate service name in catalog");

        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for svc in &services {
            for req in &svc.requires {
                assert!(
                    index.contains_key(&req.name),
                    "service {} requires unknown service {}",
                    svc.name,
                    req.name
                );
                dependents
                    .entry(req.name.clone())
                    .or_default()
                    .push(svc.name.clone());
            }
            for inc in &svc.incompatible {
                assert!(
                    index.contains_key(&inc.name),
                    "service {} lists unknown incompatible service {}",
                    svc.name,
                    inc.name
                );
            }
        }
        for deps in dependents.values_mut() {
            deps.sort();
        }

        let enable_order = topo_order(&services, |svc| {
            svc.requires.iter().map(|r| r.name.clone()).collect()
        });
        let disable_order = topo_order(&services, |svc| {
            dependents.get(&svc.name).cloned().unwrap_or_default()
        });

        Self {
            services,
            index,
            dependents,
            enable_order,
            disable_order,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.index.get(name).map(|&i| &self.services[i])
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Services that must be disabled before `name` can be.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Build an entitlement instance for `name`. A variant not defined on the
    /// service resolves to the base service rather than failing; callers that
    /// care can compare `enabled_variant` afterwards.
    pub fn entitlement_factory<'a>(
        &'a self,
        ctx: &'a Context,
        name: &str,
        variant: Option<&str>,
        access_only: bool,
        purge: bool,
    ) -> Result<Entitlement<'a>> {
        let desc = self.get(name).ok_or_else(|| ProError::EntitlementNotFound {
            name: name.to_string(),
        })?;
        let variant = variant
            .filter(|v| !v.is_empty() && desc.has_variant(v))
            .map(str::to_string);
        Ok(Entitlement::new(ctx, desc, variant, access_only, purge))
    }

    /// Fixed total order: every required service precedes its dependents.
    pub fn entitlements_enable_order(&self) -> &[String] {
        &self.enable_order
    }

    /// Fixed total order: every dependent precedes the services it requires.
    pub fn entitlements_disable_order(&self) -> &[String] {
        &self.disable_order
    }

    /// Reorder a requested list into enable order. Unknown names keep their
    /// requested relative order and go last, so the caller can report them.
    pub fn order_entitlements_for_enabling(&self, names: &[String]) -> Vec<String> {
        let requested: BTreeSet<&String> = names.iter().collect();
        let mut ordered: Vec<String> = self
            .enable_order
            .iter()
            .filter(|n| requested.contains(n))
            .cloned()
            .collect();
        ordered.extend(
            names
                .iter()
                .filter(|n| !self.index.contains_key(*n))
                .cloned(),
        );
        ordered
    }

    /// Partition a requested list into (known, unknown). Never fails.
    pub fn get_valid_entitlement_names(&self, names: &[String]) -> (Vec<String>, Vec<String>) {
        let (found, not_found) = names
            .iter()
            .cloned()
            .partition(|n| self.index.contains_key(n));
        (found, not_found)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_catalog(default_catalog())
    }
}

/// Kahn's algorithm with a name-ascending tie-break, so the same catalog always
/// yields the same sequence regardless of declaration order.
fn topo_order<F>(services: &[ServiceDescriptor], predecessors: F) -> Vec<String>
where
    F: Fn(&ServiceDescriptor) -> Vec<String>,
{
    let by_name: BTreeMap<&str, &ServiceDescriptor> =
        services.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut remaining: BTreeSet<String> = by_name.keys().map(|n| n.to_string()).collect();
    let mut order = Vec::with_capacity(services.len());

    while !remaining.is_empty() {
        // BTreeSet iteration is name-ascending; the first ready service wins.
        let next = remaining
            .iter()
            .find(|name| {
                predecessors(by_name[name.as_str()])
                    .iter()
                    .all(|p| !remaining.contains(p))
            })
            .cloned();
        match next {
            Some(name) => {
                remaining.remove(&name);
                order.push(name);
            }
            None => panic!(
                "service catalog contains an unsatisfiable dependency cycle among: {:?}",
                remaining
            ),
        }
    }
    order
}

fn req(name: &str, code: &str, title: &str) -> ServiceWithReason {
    ServiceWithReason {
        name: name.to_string(),
        reason: Reason::new(code, title),
    }
}

fn repo_kind(path: &str, key: &str, packages: &[&str]) -> ServiceKind {
    ServiceKind::Repository {
        repo_url: format!("https://esm.ubuntu.com/{}/ubuntu", path),
        key_file: key.to_string(),
        packages: packages.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn default_catalog() -> Vec<ServiceDescriptor> {
    let base = |name: &str, title: &str, description: &str, kind: ServiceKind| ServiceDescriptor {
        name: name.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        is_beta: false,
        affects_kernel: false,
        kind,
        affordances: ServiceAffordances::default(),
        requires: vec![],
        incompatible: vec![],
        variants: vec![],
        default_variant: None,
        post_enable_messages: vec![],
    };

    vec![
        base(
            "esm-infra",
            "Ubuntu Pro: ESM Infra",
            "Expanded Security Maintenance for Infrastructure",
            repo_kind("infra", "ubuntu-pro-esm-infra.gpg", &[]),
        ),
        ServiceDescriptor {
            requires: vec![req(
                "esm-infra",
                "esm-apps-requires-esm-infra",
                "ESM Apps uses the package channels provided by ESM Infra.",
            )],
            ..base(
                "esm-apps",
                "Ubuntu Pro: ESM Apps",
                "Expanded Security Maintenance for Applications",
                repo_kind("apps", "ubuntu-pro-esm-apps.gpg", &[]),
            )
        },
        ServiceDescriptor {
            incompatible: vec![
                req(
                    "fips",
                    "livepatch-invalidates-fips",
                    "Livepatching FIPS-certified kernels voids the certification.",
                ),
                req(
                    "realtime-kernel",
                    "livepatch-unsupported-on-realtime",
                    "Livepatch does not support the realtime kernel.",
                ),
            ],
            ..base(
                "livepatch",
                "Livepatch",
                "Canonical Livepatch service",
                ServiceKind::ExternalTool {
                    tool: "canonical-livepatch".to_string(),
                },
            )
        },
        ServiceDescriptor {
            affects_kernel: true,
            affordances: ServiceAffordances {
                architectures: vec!["amd64".to_string(), "arm64".to_string()],
                ..ServiceAffordances::default()
            },
            incompatible: vec![
                req(
                    "livepatch",
                    "fips-invalidated-by-livepatch",
                    "Livepatching FIPS-certified kernels voids the certification.",
                ),
                req(
                    "fips-updates",
                    "fips-updates-invalidates-fips",
                    "FIPS Updates packages are newer than the certified set.",
                ),
                req(
                    "realtime-kernel",
                    "fips-incompatible-with-realtime",
                    "The FIPS kernel and the realtime kernel cannot coexist.",
                ),
            ],
            post_enable_messages: vec![
                "A reboot is required to boot into the FIPS kernel.".to_string(),
            ],
            ..base(
                "fips",
                "FIPS",
                "NIST-certified FIPS crypto packages",
                repo_kind("fips", "ubuntu-pro-fips.gpg", &["ubuntu-fips"]),
            )
        },
        ServiceDescriptor {
            affects_kernel: true,
            affordances: ServiceAffordances {
                architectures: vec!["amd64".to_string(), "arm64".to_string()],
                ..ServiceAffordances::default()
            },
            incompatible: vec![
                req(
                    "fips",
                    "fips-updates-invalidates-fips",
                    "FIPS Updates packages are newer than the certified set.",
                ),
                req(
                    "realtime-kernel",
                    "fips-incompatible-with-realtime",
                    "The FIPS kernel and the realtime kernel cannot coexist.",
                ),
            ],
            post_enable_messages: vec![
                "A reboot is required to boot into the FIPS Updates kernel.".to_string(),
            ],
            ..base(
                "fips-updates",
                "FIPS Updates",
                "FIPS compliant crypto packages with stable security updates",
                repo_kind("fips-updates", "ubuntu-pro-fips-updates.gpg", &["ubuntu-fips"]),
            )
        },
        base(
            "usg",
            "Ubuntu Security Guide",
            "Security compliance and audit tooling (CIS, DISA-STIG)",
            repo_kind("usg", "ubuntu-pro-usg.gpg", &["usg"]),
        ),
        ServiceDescriptor {
            affordances: ServiceAffordances {
                architectures: vec!["amd64".to_string()],
                ..ServiceAffordances::default()
            },
            ..base(
                "cc-eal",
                "CC EAL2 Provisioning Packages",
                "Common Criteria EAL2 certification artifacts",
                repo_kind("cc", "ubuntu-pro-cc-eal.gpg", &["ubuntu-commoncriteria"]),
            )
        },
        ServiceDescriptor {
            requires: vec![
                req(
                    "esm-infra",
                    "ros-requires-esm-infra",
                    "ROS ESM packages build on the ESM Infra channels.",
                ),
                req(
                    "esm-apps",
                    "ros-requires-esm-apps",
                    "ROS ESM packages build on the ESM Apps channels.",
                ),
            ],
            ..base(
                "ros",
                "ROS ESM Security Updates",
                "Security updates for the Robot Operating System",
                repo_kind("ros", "ubuntu-pro-ros.gpg", &[]),
            )
        },
        ServiceDescriptor {
            requires: vec![
                req(
                    "esm-infra",
                    "ros-requires-esm-infra",
                    "ROS ESM packages build on the ESM Infra channels.",
                ),
                req(
                    "esm-apps",
                    "ros-requires-esm-apps",
                    "ROS ESM packages build on the ESM Apps channels.",
                ),
                req(
                    "ros",
                    "ros-updates-requires-ros",
                    "ROS ESM updates extend the ROS ESM security channel.",
                ),
            ],
            ..base(
                "ros-updates",
                "ROS ESM All Updates",
                "All updates for the Robot Operating System",
                repo_kind("ros-updates", "ubuntu-pro-ros-updates.gpg", &[]),
            )
        },
        ServiceDescriptor {
            is_beta: true,
            affects_kernel: true,
            affordances: ServiceAffordances {
                architectures: vec!["amd64".to_string(), "arm64".to_string()],
                ..ServiceAffordances::default()
            },
            incompatible: vec![
                req(
                    "fips",
                    "realtime-incompatible-with-fips",
                    "The realtime kernel and the FIPS kernel cannot coexist.",
                ),
                req(
                    "fips-updates",
                    "realtime-incompatible-with-fips",
                    "The realtime kernel and the FIPS kernel cannot coexist.",
                ),
                req(
                    "livepatch",
                    "realtime-unsupported-by-livepatch",
                    "Livepatch does not support the realtime kernel.",
                ),
            ],
            variants: vec![
                ServiceVariant {
                    name: "generic".to_string(),
                    title: "Real-time kernel".to_string(),
                },
                ServiceVariant {
                    name: "intel-iotg".to_string(),
                    title: "Real-time Intel IOTG kernel".to_string(),
                },
            ],
            default_variant: Some("generic".to_string()),
            post_enable_messages: vec![
                "A reboot is required to boot into the realtime kernel.".to_string(),
            ],
            ..base(
                "realtime-kernel",
                "Real-time kernel",
                "Ubuntu kernel with PREEMPT_RT patches",
                repo_kind("realtime", "ubuntu-pro-realtime.gpg", &["linux-realtime"]),
            )
        },
        ServiceDescriptor {
            is_beta: true,
            ..base(
                "anbox-cloud",
                "Anbox Cloud",
                "Scalable Android in the cloud",
                repo_kind("anbox-cloud", "ubuntu-pro-anbox.gpg", &[]),
            )
        },
    ]
}

//! Collaborator seams for host mutation: package/repository operations and
//! external tool invocation. The engine only ever talks to these traits; the
//! default backend materializes apt artifacts under the configured root and
//! shells out to the configured commands when they are set.

use crate::services::config::Config;
use anyhow::{bail, Context as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Repository and package operations of the underlying package manager.
pub trait PackageOps {
    fn configure_repository(
        &self,
        service: &str,
        url: &str,
        key_file: &str,
        variant: Option<&str>,
    ) -> anyhow::Result<()>;
    fn remove_repository(&self, service: &str) -> anyhow::Result<()>;
    fn repository_configured(&self, service: &str) -> bool;
    fn repository_variant(&self, service: &str) -> Option<String>;
    fn install(&self, packages: &[String]) -> anyhow::Result<()>;
    fn remove(&self, packages: &[String]) -> anyhow::Result<()>;
    fn is_installed(&self, package: &str) -> bool;
}

/// External tool invocation for tool-backed services.
pub trait ToolRunner {
    fn enable_tool(&self, tool: &str) -> anyhow::Result<()>;
    fn disable_tool(&self, tool: &str) -> anyhow::Result<()>;
    fn tool_active(&self, tool: &str) -> bool;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepoRecord {
    service: String,
    url: String,
    #[serde(default)]
    variant: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HostState {
    #[serde(default)]
    repositories: Vec<RepoRecord>,
    #[serde(default)]
    packages: BTreeSet<String>,
    #[serde(default)]
    tools: BTreeSet<String>,
}

/// Default backend. Repository files land under `<data_dir>/apt/`, the
/// install record under `<data_dir>/host-state.json`; `apt_cmd` and
/// `livepatch_cmd` are invoked only when configured.
pub struct HostBackend {
    apt_dir: PathBuf,
    state_path: PathBuf,
    apt_cmd: Option<String>,
    livepatch_cmd: Option<String>,
}

impl HostBackend {
    pub fn new(cfg: &Config) -> Self {
        Self {
            apt_dir: cfg.data_dir.join("apt"),
            state_path: cfg.data_dir.join("host-state.json"),
            apt_cmd: cfg.apt_cmd.clone(),
            livepatch_cmd: cfg.livepatch_cmd.clone(),
        }
    }

    fn sources_path(&self, service: &str) -> PathBuf {
        self.apt_dir
            .join("sources.list.d")
            .join(format!("ubuntu-{}.list", service))
    }

    fn key_path(&self, key_file: &str) -> PathBuf {
        self.apt_dir.join("trusted.gpg.d").join(key_file)
    }

    fn load_state(&self) -> HostState {
        std::fs::read_to_string(&self.state_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_state(&self, state: &HostState) -> anyhow::Result<()> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.state_path, serde_json::to_string_pretty(state)?)?;
        Ok(())
    }

    fn run(cmd: &str, args: &[&str]) -> anyhow::Result<()> {
        log::debug!("running {} {}", cmd, args.join(" "));
        let status = std::process::Command::new(cmd)
            .args(args)
            .status()
            .with_context(|| format!("failed to spawn {}", cmd))?;
        if !status.success() {
            bail!("{} exited with {}", cmd, status);
        }
        Ok(())
    }
}

impl PackageOps for HostBackend {
    fn configure_repository(
        &self,
        service: &str,
        url: &str,
        key_file: &str,
        variant: Option<&str>,
    ) -> anyhow::Result<()> {
        let sources = self.sources_path(service);
        if let Some(parent) = sources.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let suite = match variant {
            Some(v) => format!("stable-{}", v),
            None => "stable".to_string(),
        };
        std::fs::write(
            &sources,
            format!("deb {} {} main\n# deb-src {} {} main\n", url, suite, url, suite),
        )?;
        let key = self.key_path(key_file);
        if let Some(parent) = key.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&key, format!("managed-by=pro-client service={}\n", service))?;

        let mut state = self.load_state();
        state.repositories.retain(|r| r.service != service);
        state.repositories.push(RepoRecord {
            service: service.to_string(),
            url: url.to_string(),
            variant: variant.map(str::to_string),
        });
        self.save_state(&state)
    }

    fn remove_repository(&self, service: &str) -> anyhow::Result<()> {
        let sources = self.sources_path(service);
        if sources.exists() {
            std::fs::remove_file(&sources)?;
        }
        let mut state = self.load_state();
        state.repositories.retain(|r| r.service != service);
        self.save_state(&state)
    }

    fn repository_configured(&self, service: &str) -> bool {
        self.sources_path(service).exists()
    }

    fn repository_variant(&self, service: &str) -> Option<String> {
        self.load_state()
            .repositories
            .iter()
            .find(|r| r.service == service)
            .and_then(|r| r.variant.clone())
    }

    fn install(&self, packages: &[String]) -> anyhow::Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        if let Some(cmd) = &self.apt_cmd {
            let mut args = vec!["install", "-y"];
            args.extend(packages.iter().map(String::as_str));
            Self::run(cmd, &args)?;
        }
        let mut state = self.load_state();
        state.packages.extend(packages.iter().cloned());
        self.save_state(&state)
    }

    fn remove(&self, packages: &[String]) -> anyhow::Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        if let Some(cmd) = &self.apt_cmd {
            let mut args = vec!["remove", "-y"];
            args.extend(packages.iter().map(String::as_str));
            Self::run(cmd, &args)?;
        }
        let mut state = self.load_state();
        for pkg in packages {
            state.packages.remove(pkg);
        }
        self.save_state(&state)
    }

    fn is_installed(&self, package: &str) -> bool {
        self.load_state().packages.contains(package)
    }
}

impl ToolRunner for HostBackend {
    fn enable_tool(&self, tool: &str) -> anyhow::Result<()> {
        if let Some(cmd) = &self.livepatch_cmd {
            Self::run(cmd, &["enable"])?;
        }
        let mut state = self.load_state();
        state.tools.insert(tool.to_string());
        self.save_state(&state)
    }

    fn disable_tool(&self, tool: &str) -> anyhow::Result<()> {
        if let Some(cmd) = &self.livepatch_cmd {
            Self::run(cmd, &["disable"])?;
        }
        let mut state = self.load_state();
        state.tools.remove(tool);
        self.save_state(&state)
    }

    fn tool_active(&self, tool: &str) -> bool {
        self.load_state().tools.contains(tool)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config::Config;
    use std::path::Path;

    fn backend(dir: &Path) -> HostBackend {
        let cfg = Config {
            data_dir: dir.to_path_buf(),
            apt_cmd: None,
            livepatch_cmd: None,
            ..Config::default()
        };
        HostBackend::new(&cfg)
    }

    #[test]
    fn repository_roundtrip_writes_and_removes_sources_file() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        b.configure_repository("esm-infra", "https://esm.ubuntu.com/infra/ubuntu", "k.gpg", None)
            .unwrap();
        assert!(b.repository_configured("esm-infra"));
        assert!(tmp
            .path()
            .join("apt/sources.list.d/ubuntu-esm-infra.list")
            .exists());
        b.remove_repository("esm-infra").unwrap();
        assert!(!b.repository_configured("esm-infra"));
    }

    #[test]
    fn variant_is_recorded_with_the_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        b.configure_repository("realtime-kernel", "https://x", "k.gpg", Some("generic"))
            .unwrap();
        assert_eq!(b.repository_variant("realtime-kernel").as_deref(), Some("generic"));
    }

    #[test]
    fn install_without_apt_cmd_records_packages_locally() {
        let tmp = tempfile::tempdir().unwrap();
        let b = backend(tmp.path());
        b.install(&["usg".to_string()]).unwrap();
        assert!(b.is_installed("usg"));
        b.remove(&["usg".to_string()]).unwrap();
        assert!(!b.is_installed("usg"));
    }
}

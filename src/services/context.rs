use crate::domain::errors::Result;
use crate::services::config::Config;
use crate::services::host::{HostBackend, PackageOps, ToolRunner};
use std::path::PathBuf;
use std::rc::Rc;

/// Per-invocation context: configuration, resolved state paths, and the host
/// collaborator handles. Constructed once in `main` (or per test) and passed
/// explicitly everywhere; there is no ambient global.
pub struct Context {
    pub cfg: Config,
    pub packages: Rc<dyn PackageOps>,
    pub tools: Rc<dyn ToolRunner>,
    euid_is_root: bool,
}

impl Context {
    pub fn load() -> Result<Self> {
        let cfg = Config::load()?;
        std::fs::create_dir_all(&cfg.data_dir)?;
        let backend = Rc::new(HostBackend::new(&cfg));
        Ok(Self {
            cfg,
            packages: backend.clone(),
            tools: backend,
            euid_is_root: nix::unistd::geteuid().is_root(),
        })
    }

    /// Root requirement for mutating operations, with the configured escape
    /// hatch for containers and test environments.
    pub fn can_mutate_host(&self) -> bool {
        self.euid_is_root || self.cfg.features.allow_non_root
    }

    pub fn machine_token_path(&self) -> PathBuf {
        self.cfg.data_dir.join("machine-token.json")
    }

    pub fn status_cache_path(&self) -> PathBuf {
        self.cfg.data_dir.join("status.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.cfg.data_dir.join("lock")
    }

    pub fn notices_path(&self) -> PathBuf {
        self.cfg.data_dir.join("notices.json")
    }

    #[cfg(test)]
    pub fn for_testing<B>(data_dir: PathBuf, backend: Rc<B>, euid_is_root: bool) -> Self
    where
        B: PackageOps + ToolRunner + 'static,
    {
        let cfg = Config {
            data_dir,
            apt_cmd: None,
            livepatch_cmd: None,
            ..Config::default()
        };
        Self {
            cfg,
            packages: backend.clone(),
            tools: backend,
            euid_is_root,
        }
    }
}

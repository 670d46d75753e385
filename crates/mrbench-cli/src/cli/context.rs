//! Shared wiring for commands: configuration, logging, registry, store and Ctrl-C.

use std::path::PathBuf;

use anyhow::Context as _;
use mrbench_core::config::{default_db_path, load_config};
use mrbench_core::{AdapterRegistry, MrbenchConfig, Store};
use tokio_util::sync::CancellationToken;

use super::args::GlobalArgs;

pub struct Context {
    pub config: MrbenchConfig,
    db: Option<PathBuf>,
}

impl Context {
    /// Loads configuration and starts logging at `logging.level` unless `RUST_LOG` is set.
    pub fn load(global: &GlobalArgs) -> anyhow::Result<Self> {
        let config = load_config(global.config.as_deref())?;
        init_logging(&config.logging.level);
        Ok(Self {
            config,
            db: global.db.clone(),
        })
    }

    pub fn registry(&self) -> AdapterRegistry {
        AdapterRegistry::from_config(&self.config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .or_else(default_db_path)
            .unwrap_or_else(|| PathBuf::from("mrbench.db"))
    }

    pub fn open_store(&self) -> anyhow::Result<Store> {
        let path = self.db_path();
        let store = Store::open(&path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        store.init_schema()?;
        tracing::debug!(path = %path.display(), "database ready");
        Ok(store)
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // Fails only when a logger is already installed.
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Token cancelled on the first Ctrl-C. The running job is killed; later jobs never start.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            signalled.cancel();
        }
    });
    token
}

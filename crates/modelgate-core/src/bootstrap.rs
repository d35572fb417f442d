use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;

use modelgate_common::{GlobalConfig, GlobalConfigPatch};
use modelgate_provider_core::ProviderRegistry;
use modelgate_storage::{SeaOrmStorage, Storage};

use crate::audit::AuditRecorder;
use crate::circuit_breaker::CircuitBreaker;
use crate::credential_store::CredentialStore;
use crate::encryption::Encryptor;
use crate::fallback::FallbackExecutor;
use crate::rate_limiter::CompositeRateLimiter;
use crate::resolver::ModelResolver;
use crate::shared_store::{InMemorySharedStore, SharedStore};

/// CLI surface overlaying environment variables (merge order CLI > ENV >
/// DB). Field names follow the `MODELGATE_*` prefix convention.
#[derive(Debug, Clone, Parser)]
#[command(name = "modelgate", version, about = "OpenAI-compatible LLM proxy")]
pub struct CliArgs {
    /// Database DSN (required to bootstrap the rest of config).
    #[arg(long, env = "MODELGATE_DSN")]
    pub dsn: Option<String>,

    #[arg(long, env = "MODELGATE_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "MODELGATE_PORT")]
    pub port: Option<u16>,

    /// Base64 32-byte key, or a passphrase to derive one from.
    #[arg(long, env = "MODELGATE_ENCRYPTION_SECRET")]
    pub encryption_secret: Option<String>,

    #[arg(long, env = "MODELGATE_MAX_FALLBACK_ATTEMPTS")]
    pub max_fallback_attempts: Option<u32>,

    #[arg(long, env = "MODELGATE_UPSTREAM_TIMEOUT_SECONDS")]
    pub default_upstream_timeout_seconds: Option<u64>,
}

/// Fully wired runtime state. Every component reads from the `ArcSwap`
/// snapshots here; the admin surface is the only writer.
pub struct AppState {
    pub global: ArcSwap<GlobalConfig>,
    pub storage: Arc<dyn Storage>,
    pub shared_store: Arc<dyn SharedStore>,
    pub resolver: Arc<ModelResolver>,
    pub credentials: Arc<CredentialStore>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub rate_limiter: Arc<CompositeRateLimiter>,
    pub fallback: Arc<FallbackExecutor>,
    pub audit: Arc<AuditRecorder>,
    pub registry: Arc<ProviderRegistry>,
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
}

pub async fn bootstrap_from_env(registry: ProviderRegistry) -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args, registry).await
}

pub async fn bootstrap(args: CliArgs, registry: ProviderRegistry) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    ensure_sqlite_parent_dir(&dsn)?;

    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await.context("connect storage")?);
    storage.sync().await.context("schema sync")?;

    let db_config_json = storage.load_global_config().await.context("load global_config")?;
    let mut merged = db_config_json
        .map(|value| serde_json::from_value::<GlobalConfig>(value).map(GlobalConfigPatch::from))
        .transpose()
        .context("decode persisted global_config")?
        .unwrap_or_default();

    let cli_patch = GlobalConfigPatch {
        host: args.host,
        port: args.port,
        dsn: Some(dsn),
        encryption_secret: args.encryption_secret,
        max_fallback_attempts: args.max_fallback_attempts,
        default_upstream_timeout_seconds: args.default_upstream_timeout_seconds,
        rate_limit: None,
        circuit_breaker: None,
    };
    merged.overlay(cli_patch);

    let global: GlobalConfig = merged.into_config().context("finalize merged global config")?;

    storage
        .upsert_global_config(&serde_json::to_value(&global).context("serialize global config")?)
        .await
        .context("persist global_config")?;

    let snapshot = storage.load_snapshot().await.context("load snapshot")?;

    let encryptor = Arc::new(Encryptor::new(&global.encryption_secret).context("build encryptor")?);
    let shared_store: Arc<dyn SharedStore> = InMemorySharedStore::new();
    let resolver = Arc::new(ModelResolver::new(snapshot.clone()));
    let credentials = Arc::new(CredentialStore::new(
        snapshot,
        storage.clone(),
        shared_store.clone(),
        encryptor,
    ));
    let circuit_breaker = Arc::new(CircuitBreaker::new(global.circuit_breaker.clone()));
    let rate_limiter = Arc::new(CompositeRateLimiter::new(shared_store.clone(), global.rate_limit.clone()));
    let fallback = Arc::new(FallbackExecutor::new(
        resolver.clone(),
        credentials.clone(),
        circuit_breaker.clone(),
        Arc::new(registry.clone()),
        global.max_fallback_attempts,
        Duration::from_secs(global.default_upstream_timeout_seconds),
    ));
    let audit = Arc::new(AuditRecorder::new(storage.clone()));

    let state = Arc::new(AppState {
        global: ArcSwap::from_pointee(global),
        storage: storage.clone(),
        shared_store,
        resolver,
        credentials,
        circuit_breaker,
        rate_limiter,
        fallback,
        audit,
        registry: Arc::new(registry),
    });

    Ok(Bootstrap { storage, state })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("MODELGATE_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/modelgate.db?mode=rwc");
    }
    "sqlite://modelgate.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }
    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }
    if normalized.to_ascii_lowercase() == ":memory:" {
        return None;
    }
    Some(PathBuf::from(normalized))
}

#[cfg(test)]
mod tests {
    use super::sqlite_file_path_from_dsn;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://modelgate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "modelgate.db");
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite://app/data/modelgate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "/app/data/modelgate.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }
}

//! Service bootstrap: wiring the pipeline together for `serve`.

use ds_cache::store::{ArtifactStore, StorePolicy};
use ds_cache::sweeper::{SweepLimits, Sweeper};
use ds_core::config::RootConfig;
use ds_core::error::{CoreError, CoreResult};
use ds_core::layout::{CacheLock, RootLayout};
use ds_core::secrets::SecretsVault;
use ds_engine::pool::EnginePool;
use ds_report::registry::{ReportRegistry, WatchGuard};
use ds_runtime::Dispatcher;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// State shared by every handler.
pub struct ServiceState {
    pub dispatcher: Arc<Dispatcher>,
    pub layout: RootLayout,
    pub config: RootConfig,
}

/// A fully wired service plus the guards that keep it healthy: the
/// single-process cache lock, the eviction sweeper, and (in dev mode) the
/// registry watcher.
pub struct Service {
    pub state: Arc<ServiceState>,
    _lock: CacheLock,
    _sweeper: Sweeper,
    _watcher: Option<WatchGuard>,
}

impl Service {
    /// Validate the root, take the cache lock, and build the pipeline.
    pub fn open(root: &Path, dev: bool) -> CoreResult<Self> {
        let layout = RootLayout::validate_creating_cache(root)?;
        let config = RootConfig::load_from_dir(root)?;
        layout.check_deployment(&config.deployment_id)?;
        let lock = CacheLock::acquire(&layout)?;

        let registry = Arc::new(ReportRegistry::open(&layout.reports)?);
        let watcher = if dev {
            Some(registry.watch(Duration::from_secs(1)))
        } else {
            None
        };

        let vault = Arc::new(load_vault(&registry, &config, &layout)?);

        let store = ArtifactStore::new(
            layout.clone(),
            StorePolicy {
                default_ttl: Duration::from_secs(config.cache.ttl_seconds),
                soft_timeout: Duration::from_secs(config.limits.soft_timeout_seconds),
                hard_timeout: Duration::from_secs(config.limits.hard_timeout_seconds),
                stale_while_revalidate: config.cache.stale_while_revalidate,
            },
        );
        let sweeper = Sweeper::spawn(
            Arc::clone(&store),
            SweepLimits {
                max_kind_bytes: config.cache.max_kind_bytes,
                max_total_bytes: config.cache.max_total_bytes,
            },
            Duration::from_secs(config.cache.sweep_interval_seconds),
        );

        let pool = Arc::new(EnginePool::new(config.engine.effective_pool_size()));
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            registry,
            store,
            pool,
            vault,
        ));

        Ok(Self {
            state: Arc::new(ServiceState {
                dispatcher,
                layout,
                config,
            }),
            _lock: lock,
            _sweeper: sweeper,
            _watcher: watcher,
        })
    }
}

/// Resolve every secret declared by any report in the root. Missing values
/// fail startup, not the first request that needs them.
fn load_vault(
    registry: &Arc<ReportRegistry>,
    config: &RootConfig,
    layout: &RootLayout,
) -> CoreResult<SecretsVault> {
    let mut names: Vec<String> = Vec::new();
    for record in registry.snapshot().records() {
        if let Ok(report) = &record.parsed {
            names.extend(report.blocks.secrets.iter().cloned());
        }
    }
    names.sort();
    names.dedup();
    if names.is_empty() {
        return Ok(SecretsVault::empty());
    }
    SecretsVault::load(&names, config.secrets_file_path(&layout.root).as_deref())
}

/// Bind and run the HTTP server until shutdown.
pub async fn serve(service: Service, host: &str, port: u16) -> CoreResult<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| CoreError::ConfigInvalid {
            detail: format!("invalid listen address {host}:{port}: {e}"),
        })?;
    let router = crate::routes::build_router(Arc::clone(&service.state));

    log::info!(
        "ducksearch serving {} reports from {} on {}",
        service.state.dispatcher.registry().snapshot().len(),
        service.state.layout.root.display(),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await.map_err(CoreError::Io)?;
    Ok(())
}

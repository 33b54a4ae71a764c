//! Shared application state wired at startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use stratagem_core::access::AccessCheckService;
use stratagem_core::limit::InMemoryRateLimiter;
use stratagem_core::ontology::OntologyCacheService;
use stratagem_core::session::manager::SessionManager;
use stratagem_core::stream::handler::StreamHandler;
use stratagem_infra::authz::http::HttpAuthzClient;
use stratagem_infra::config::{database_url, load_service_config, resolve_data_dir};
use stratagem_infra::loader::sqlite::SqliteContextLoader;
use stratagem_infra::orchestrator::http::HttpOrchestrator;
use stratagem_infra::snapshot::LoggingSnapshotScheduler;
use stratagem_infra::sqlite::pool::DatabasePool;
use stratagem_infra::sqlite::probe::SqliteEntityProbe;
use stratagem_infra::sqlite::session::SqliteSessionRepository;
use stratagem_types::config::ServiceConfig;

/// The turn pipeline over the SQLite and HTTP adapters.
pub type ConcreteStreamHandler = StreamHandler<
    SqliteSessionRepository,
    HttpAuthzClient,
    SqliteEntityProbe,
    SqliteContextLoader,
    HttpOrchestrator,
    LoggingSnapshotScheduler,
>;

/// Application state shared across HTTP handlers and CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub stream_handler: Arc<ConcreteStreamHandler>,
    /// Session reads outside the turn pipeline (list, show, status).
    pub sessions: Arc<SessionManager<SqliteSessionRepository>>,
    pub rate_limiter: Arc<InMemoryRateLimiter>,
    pub config: ServiceConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data directory, load config, open the database, and
    /// wire the turn pipeline.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_service_config(&data_dir).await;
        let db_url = database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url).await?;

        Ok(Self::from_parts(config, data_dir, db_pool))
    }

    /// Wire the pipeline over an already-open pool. Split from
    /// [`Self::init`] so tests can inject a temporary database.
    pub fn from_parts(config: ServiceConfig, data_dir: PathBuf, db_pool: DatabasePool) -> Self {
        let authz = HttpAuthzClient::new(
            config.authz.base_url.clone(),
            service_token("STRATAGEM_AUTHZ_TOKEN"),
            Duration::from_millis(config.authz.timeout_ms),
        );
        let orchestrator = HttpOrchestrator::new(
            config.orchestrator.base_url.clone(),
            service_token("STRATAGEM_ORCHESTRATOR_TOKEN"),
            Duration::from_millis(config.orchestrator.connect_timeout_ms),
        );
        let loader = SqliteContextLoader::with_ttl(
            db_pool.clone(),
            Duration::from_secs(config.cache.loader_ttl_secs),
        );
        let ontology = OntologyCacheService::with_ttl(
            loader,
            Duration::from_secs(config.cache.ontology_ttl_secs),
        );

        let stream_handler = Arc::new(StreamHandler::new(
            SessionManager::new(SqliteSessionRepository::new(db_pool.clone())),
            AccessCheckService::new(authz, SqliteEntityProbe::new(db_pool.clone())),
            ontology,
            orchestrator,
            LoggingSnapshotScheduler::new(),
        ));
        let sessions = Arc::new(SessionManager::new(SqliteSessionRepository::new(
            db_pool.clone(),
        )));
        let rate_limiter = Arc::new(InMemoryRateLimiter::new(config.rate_limit.clone()));

        Self {
            stream_handler,
            sessions,
            rate_limiter,
            config,
            data_dir,
            db_pool,
        }
    }
}

/// Bearer token for an upstream service. Empty when the deployment does
/// not require one.
fn service_token(var: &str) -> SecretString {
    SecretString::from(std::env::var(var).unwrap_or_default())
}

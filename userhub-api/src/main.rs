mod app;

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use app::{app_router, AppState, CorsPolicy};
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use userhub_core::{
    AccountCoordinator, FirebaseAuth, IdentityProvider, LogIncidentSink, MemoryIdentityProvider,
    SqlProfileStore,
};

const DEFAULT_DATABASE_URL: &str = "sqlite://./data/userhub.db?mode=rwc";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderKind {
    Firebase {
        project_id: Option<String>,
        credentials: PathBuf,
    },
    Memory {
        seed: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
struct ApiConfig {
    bind: SocketAddr,
    database_url: String,
    provider: ProviderKind,
    cors: CorsPolicy,
}

impl ApiConfig {
    fn from_env() -> anyhow::Result<Self> {
        let bind = match env::var("UH_BIND") {
            Ok(s) => s.parse().with_context(|| format!("invalid UH_BIND: {s}"))?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let database_url =
            env::var("UH_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let provider = match env::var("UH_PROVIDER").as_deref().unwrap_or("firebase") {
            "firebase" => ProviderKind::Firebase {
                project_id: env::var("UH_FIREBASE_PROJECT_ID")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                credentials: env::var("GOOGLE_APPLICATION_CREDENTIALS")
                    .map(PathBuf::from)
                    .context("GOOGLE_APPLICATION_CREDENTIALS must point to a service account key")?,
            },
            "memory" => ProviderKind::Memory {
                seed: env::var("UH_MEMORY_SEED").ok().map(PathBuf::from),
            },
            other => bail!("unknown UH_PROVIDER '{other}' (expected 'firebase' or 'memory')"),
        };

        let cors = CorsPolicy::parse(env::var("UH_CORS_ORIGINS").ok().as_deref())?;

        Ok(Self {
            bind,
            database_url,
            provider,
            cors,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    init_tracing();

    let config = ApiConfig::from_env()?;
    info!("starting API on {}", config.bind);

    let provider = build_provider(&config.provider)?;

    ensure_sqlite_dir(&config.database_url)?;
    let store = Arc::new(
        SqlProfileStore::connect(&config.database_url)
            .await
            .context("opening profile store")?,
    );

    let coordinator = Arc::new(AccountCoordinator::new(
        provider.clone(),
        Arc::new(LogIncidentSink),
    ));

    let state = AppState {
        provider,
        store,
        coordinator,
    };

    let app = app_router(state, &config.cors);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn build_provider(kind: &ProviderKind) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    match kind {
        ProviderKind::Firebase {
            project_id,
            credentials,
        } => {
            let auth = FirebaseAuth::from_credentials_file(project_id.clone(), credentials)
                .context("configuring firebase provider")?;
            info!(project = %auth.project_id(), "using firebase identity provider");
            Ok(Arc::new(auth))
        }
        ProviderKind::Memory { seed } => {
            warn!("using in-memory identity provider; accounts are lost on restart");
            let provider = match seed {
                Some(path) => MemoryIdentityProvider::from_seed_file(path)
                    .context("loading memory provider seed")?,
                None => MemoryIdentityProvider::new(),
            };
            Ok(Arc::new(provider))
        }
    }
}

/// Create the parent directory of a file-backed SQLite URL.
fn ensure_sqlite_dir(url: &str) -> anyhow::Result<()> {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory: {}", parent.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

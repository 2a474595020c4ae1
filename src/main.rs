//! Aula - Session and credential lifecycle service

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aula::{
    api::{self, AppState},
    cache::create_cache,
    config::Config,
    db::{
        self,
        repositories::{SqlxSessionRepository, SqlxUserRepository},
    },
    services::{
        AccountService, ClaimsCodec, IdCipher, LogMailer, RateLimiter, RecoveryLimits,
        SessionService, SessionStore,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aula=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Aula authentication service...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized");

    // Create repositories and the session store
    let user_repo = SqlxUserRepository::boxed(pool.clone());
    let session_repo = Arc::new(SqlxSessionRepository::new(pool.clone()));
    let store = Arc::new(SessionStore::with_cache(session_repo, cache.clone()));

    // Wire services
    let claims = ClaimsCodec::new(config.auth.jwt_secret(), config.auth.access_ttl_min);
    let id_cipher = Arc::new(IdCipher::new(config.auth.id_secret()));
    let rate_limiter = Arc::new(RateLimiter::with_cache(cache.clone()));

    let session_service = Arc::new(SessionService::new(
        user_repo.clone(),
        store.clone(),
        claims,
        config.auth.refresh_ttl_hours,
    ));
    let account_service = Arc::new(AccountService::new(
        user_repo,
        store.clone(),
        rate_limiter.clone(),
        Arc::new(LogMailer),
        RecoveryLimits {
            window: Duration::from_secs(config.rate_limit.window_seconds),
            max_per_ip: config.rate_limit.max_per_ip,
            max_per_email: config.rate_limit.max_per_email,
        },
    ));

    let state = AppState {
        pool: pool.clone(),
        session_service,
        account_service,
        id_cipher,
        refresh_ttl_hours: config.auth.refresh_ttl_hours,
    };

    // Rate limiter fallback cleanup (runs every 5 minutes)
    {
        let limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup();
            }
        });
    }

    // Expired session sweep (runs hourly)
    {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match store.delete_expired().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Swept {} expired sessions", n),
                    Err(e) => tracing::warn!("Expired session sweep failed: {:#}", e),
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

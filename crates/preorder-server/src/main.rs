mod api;
mod middleware;
mod store;

use std::sync::Arc;

use anyhow::Context;
use preorder_core::AppConfig;
use preorder_engine::{Scheduler, SchedulerConfig};
use preorder_storefront::{StorefrontClient, StorefrontEngine};
use preorder_telegram::TelegramClient;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
    store::PgOrderStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(preorder_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = preorder_db::PoolConfig::from_app_config(&config);
    let pool = preorder_db::connect_pool(&config.database_url, pool_config).await?;
    preorder_db::run_migrations(&pool).await?;

    let scheduler = build_scheduler(pool.clone(), &config).await?;
    scheduler.recover_interrupted().await?;
    scheduler.ensure_active().await?;

    let auth = AuthState::from_env(matches!(
        config.env,
        preorder_core::Environment::Development
    ))?;
    let app = build_app(
        AppState {
            pool,
            scheduler: scheduler.clone(),
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, env = %config.env, "preorder-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn build_scheduler(pool: PgPool, config: &AppConfig) -> anyhow::Result<Scheduler> {
    let telegram = TelegramClient::with_base_url(
        &config.telegram_bot_token,
        preorder_telegram::ClientOptions::from_app_config(config),
        &config.telegram_api_base_url,
    )
    .context("failed to build Telegram client")?;
    let storefront = StorefrontClient::new(
        &config.storefront_url,
        config.storefront_api_key.clone(),
        preorder_storefront::ClientOptions::from_app_config(config),
    )
    .context("failed to build storefront client")?;

    let scheduler = Scheduler::new(
        Arc::new(PgOrderStore::new(pool)),
        Arc::new(telegram),
        Arc::new(StorefrontEngine::new(storefront)),
        SchedulerConfig::from_app_config(config),
    )
    .await?;
    Ok(scheduler)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}

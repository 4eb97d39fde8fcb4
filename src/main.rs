//! Warden - Identity & Authorization Server
//! Mission: Know who is calling and what they may do

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden::{
    auth::{
        self,
        mailer::{LogMailer, MailSettings, MAIL_CONFIG_MODULE},
        password::PasswordHasher,
        AuthState, ClassicAuth, TokenService,
    },
    config::{load_env, AppConfig},
    privilege::PrivilegeCache,
    store::{load_config, save_config, SqliteStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    load_env();
    init_tracing();

    info!("🚀 Warden starting");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    debug!(?config, "Configuration loaded");

    let store = Arc::new(
        SqliteStore::new(&config.db_path, config.store_timeout)
            .with_context(|| format!("Failed to open store at {}", config.db_path))?,
    );

    let mail = match load_config::<MailSettings>(store.as_ref(), MAIL_CONFIG_MODULE)
        .await
        .context("Failed to load mail settings")?
    {
        Some(settings) => settings,
        None => {
            let settings = MailSettings::default();
            save_config(store.as_ref(), MAIL_CONFIG_MODULE, &settings)
                .await
                .context("Failed to save default mail settings")?;
            info!("📧 Default mail settings stored");
            settings
        }
    };

    let privileges = Arc::new(
        PrivilegeCache::load(store.clone())
            .await
            .context("Failed to load privilege table")?,
    );
    // Persist seeded defaults right away instead of waiting for the first tick
    if let Err(e) = privileges.sync_once().await {
        warn!("⚠️ Initial privilege sync failed: {}", e);
    }

    let tokens = Arc::new(TokenService::new(config.jwt_secret.clone()));
    let classic = Arc::new(ClassicAuth::new(
        store.clone(),
        tokens.clone(),
        PasswordHasher::new(config.bcrypt_cost).with_min_length(config.min_password_len),
        Arc::new(LogMailer::new(mail.clone())),
        mail,
    ));

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        match classic.bootstrap_admin(email, password).await {
            Ok(Some(id)) => info!("👑 Bootstrap admin created: {}", id),
            Ok(None) => debug!("Admin account already present, skipping bootstrap"),
            Err(e) => warn!("⚠️ Admin bootstrap failed: {}", e),
        }
    }

    let sync = if config.privilege_sync_enabled {
        Some(privileges.start_sync(config.privilege_sync_interval))
    } else {
        info!("🔄 Privilege sync disabled");
        None
    };

    let state = AuthState::new(classic, tokens, store.clone(), privileges.clone());
    let app = auth::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("🛑 Server stopped, flushing privileges");
    if let Some(sync) = sync {
        sync.stop().await;
    }
    match privileges.sync_once().await {
        Ok(outcome) => info!("💾 Final privilege sync: {:?}", outcome),
        Err(e) => warn!("⚠️ Final privilege sync failed: {}", e),
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

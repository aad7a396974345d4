//! Kreis Auth API - accounts, sessions and access control
//!
//! Password login with per-client lockout, self-contained session tokens
//! with sliding renewal, email-based password reset, federated login for
//! the organisation's tenant and role-gated account administration.

mod accounts;
mod audit;
mod auth;
mod config;
mod error;
mod mail;
mod models;
mod routes;
mod state;

use crate::accounts::{
    AccountStore, InMemoryAccountStore, NewAccount, PostgresAccountStore, ACCOUNTS_TABLE_DDL,
};
use crate::audit::{AuditSink, LogAuditSink, PostgresAuditSink, AUDIT_TABLE_DDL};
use crate::auth::{hash_password, Role};
use crate::config::{BootstrapAdmin, DatabaseConfig, Settings};
use crate::mail::LogMailSender;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Kreis Auth API...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    if settings.auth.uses_dev_secret() {
        warn!("⚠️  JWT_SECRET not set, using default (INSECURE - set in production!)");
    }

    let (accounts, audit): (Arc<dyn AccountStore>, Arc<dyn AuditSink>) = match &settings.database {
        Some(db) => {
            let pool = init_database_pool(db).await?;
            info!("✅ Database pool created successfully");

            create_database_tables(&pool).await?;

            (
                Arc::new(PostgresAccountStore::new(pool.clone())),
                Arc::new(PostgresAuditSink::new(pool)),
            )
        }
        None => {
            warn!("⚠️  DATABASE_URL not set, accounts are kept in memory and lost on restart");
            (Arc::new(InMemoryAccountStore::new()), Arc::new(LogAuditSink))
        }
    };

    if let Some(admin) = &settings.auth.bootstrap_admin {
        seed_admin(accounts.as_ref(), admin).await?;
    }

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    let federation_enabled = settings.federation.enabled;

    let state = Arc::new(AppState::new(settings, accounts, Arc::new(LogMailSender), audit)?);

    // Build the router
    let app = create_router(state);

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Authentication ───");
    info!("   POST /api/auth/login           - Login with email/password");
    info!("   POST /api/auth/request-reset   - Request a password reset email");
    info!("   POST /api/auth/reset-password  - Set a new password with a reset token");
    info!("   POST /api/auth/microsoft       - Federated login (enabled: {})", federation_enabled);
    info!("   POST /api/auth/renew           - Renew session token");
    info!("   GET  /api/auth/me              - Get current user");
    info!("");
    info!("   ─── Account Management (admin) ───");
    info!("   GET    /api/users              - List accounts");
    info!("   POST   /api/users              - Create account");
    info!("   PUT    /api/users/{{id}}         - Update account");
    info!("   DELETE /api/users/{{id}}         - Delete account");
    info!("");

    // Create TCP listener and serve; peer addresses feed the login lockout
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kreis_auth=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Initialize database pool from the parsed DATABASE_URL
async fn init_database_pool(db: &DatabaseConfig) -> anyhow::Result<deadpool_postgres::Pool> {
    use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod};

    let mut cfg = Config::new();
    cfg.host = Some(db.host.clone());
    cfg.port = Some(db.port);
    cfg.user = Some(db.user.clone());
    cfg.password = Some(db.password.clone());
    cfg.dbname = Some(db.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(db.max_pool_size));

    // Create pool with TLS support if needed
    let pool = if db.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    // Fail fast if the database is unreachable
    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;
    client
        .query_one("SELECT 1 as ok", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

    info!("✅ Database connection successful (TLS: {})", db.require_tls);
    Ok(pool)
}

/// Create database tables if they don't exist
async fn create_database_tables(pool: &deadpool_postgres::Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;

    client.execute(ACCOUNTS_TABLE_DDL, &[]).await?;
    client.execute(AUDIT_TABLE_DDL, &[]).await?;

    info!("✅ Database tables initialized");
    Ok(())
}

/// Create the configured admin account unless the email is already taken
async fn seed_admin(accounts: &dyn AccountStore, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    if accounts.find_by_email(&admin.email).await?.is_some() {
        return Ok(());
    }

    let account = accounts
        .create(NewAccount {
            email: admin.email.clone(),
            password_hash: hash_password(&admin.password)?,
            role: Role::Admin,
            display_name: None,
        })
        .await?;

    info!(account_id = account.id, email = %account.email, "Bootstrap admin created");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}

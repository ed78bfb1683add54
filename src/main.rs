use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dirview::auth::Auth;
use dirview::config::AppConfig;
use dirview::http::{self, AppState};
use dirview::ldap::{DirectoryHandle, LdapGateway};
use dirview::mail::Mailer;
use dirview::pwned::PwnedPasswords;
use dirview::view::registry::ViewRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    let directory: DirectoryHandle =
        Arc::new(LdapGateway::new(config.ldap.clone()).context("connecting to the directory")?);
    let views = Arc::new(
        ViewRegistry::new(
            &config.views,
            &config.ldap.prefix,
            directory.clone(),
            Arc::new(PwnedPasswords::new()),
        )
        .await
        .context("constructing views")?,
    );
    let auth = Arc::new(Auth::new(&config.auth, directory.clone()).context("constructing auth")?);
    let mailer = Arc::new(Mailer::new(config.mail.clone()).context("constructing mailer")?);

    let state = AppState {
        views,
        auth,
        mailer,
    };
    let app = http::router(state, &config.allow_origins);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8000")
        .await
        .context("binding listen socket")?;
    info!("Server up at {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}

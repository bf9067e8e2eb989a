use std::net::Ipv4Addr;
use std::sync::Arc;

use mailroom::auth::JwtConfig;
use mailroom::mail::SmtpConnector;
use mailroom::store::PgStore;
use mailroom::{EnvConfig, Settings};
use mailroom_server::{app, AppState, RateLimits};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;

    let store = PgStore::connect(
        &settings.database_url,
        settings.database_max_connections,
        settings.encryption_key.clone(),
    )
    .await?;
    store.migrate().await?;

    let jwt = JwtConfig::new(&settings.hmac_key)
        .ttl(settings.token_ttl())
        .build();
    let connector = Arc::new(SmtpConnector::new(settings.smtp_timeout()));
    let state = AppState::new(store, jwt, connector, settings.bulk_throttle())
        .rate_limits(RateLimits::new(
            settings.api_rate_limit,
            settings.auth_rate_limit,
            settings.rate_limit_window(),
        ))
        .cors_origins(settings.cors_origins());

    mailroom::serve((Ipv4Addr::UNSPECIFIED, settings.port), app(state)).await?;

    Ok(())
}

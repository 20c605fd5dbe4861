use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ussd_onboarding::config::ServiceConfig;
use ussd_onboarding::phone::PhoneNormalizer;
use ussd_onboarding::provisioning::{
    HttpProvisioning, LocalProvisioning, PinHasher, ProvisioningBridge,
};
use ussd_onboarding::store::LibSqlBackend;
use ussd_onboarding::ussd::{UssdRouteState, UssdRouter, ussd_routes};

/// Log to stderr, and additionally to a daily-rotated file when a log
/// directory is configured. The returned guard must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ussd-onboarding.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📱 USSD Onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Gateway callback: http://{}/ait_ussd", config.listen_addr());
    eprintln!("   Database: {}", config.db_path.display());

    let db = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .context("Failed to open database")?,
    );

    let hasher = PinHasher::new();
    let bridge: Arc<dyn ProvisioningBridge> = match &config.provisioning {
        Some(remote) => {
            tracing::info!(base_url = %remote.base_url, "Using remote profile service");
            Arc::new(
                HttpProvisioning::new(&remote.base_url, remote.token.clone(), remote.timeout)
                    .context("Failed to build provisioning client")?,
            )
        }
        None => {
            tracing::info!("Using local account store");
            Arc::new(LocalProvisioning::new(db.clone(), hasher.clone()))
        }
    };

    let phones = PhoneNormalizer::new(config.default_country_code.clone());
    tracing::info!(
        country_code = phones.country_code(),
        "National numbers expand with the default country code"
    );
    let router = UssdRouter::new(db.clone(), bridge, phones, hasher);
    let app = ussd_routes(UssdRouteState {
        router: Arc::new(router),
        sessions: db,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;
    tracing::info!(addr = %config.listen_addr(), "USSD server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

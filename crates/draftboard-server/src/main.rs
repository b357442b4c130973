use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use draftboard_server::config::{LogFormat, ServerConfig};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Received shutdown signal, closing connections");
    // Upgraded sockets sit outside the HTTP server's graceful shutdown.
    token.cancel();
}

#[tokio::main]
async fn main() {
    let (config, notices) = ServerConfig::load();
    init_tracing(config.log_format);
    for notice in &notices {
        notice.log();
    }

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    let store = match draftboard_server::open_store(&config.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open game store");
            std::process::exit(1);
        },
    };

    let listen_addr = config.listen_addr.clone();
    let (app, state) = draftboard_server::build_app(config, store);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, "Draftboard server listening");

    let token = state.directory.shutdown_token().clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(token))
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    state.directory.shutdown().await;
    tracing::info!("Draftboard server stopped");
}

use log::*;
use service::AppState;

pub use self::error::{Error, Result};

mod controller;
pub(crate) mod error;
pub mod router;

/// Bind the configured interface and port and serve the router until the
/// process receives Ctrl-C.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let interface = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let address = format!("{}:{}", interface, app_state.config.port);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Server starting... listening for connections on http://{address}");

    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal, stopping server"),
            Err(e) => {
                error!("Unable to listen for shutdown signal: {e}");
                std::future::pending::<()>().await
            }
        }
    };

    axum::serve(listener, router::define_routes(app_state))
        .with_graceful_shutdown(shutdown_signal)
        .await
}

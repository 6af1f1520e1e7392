use log::*;
use service::{config::Config, logging::Logger, AppState};
use std::process;

#[tokio::main]
async fn main() {
    let config = Config::new();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        process::exit(1);
    }

    info!(
        "Starting open platform webhook server in {} mode",
        config.runtime_env()
    );

    let app_state = match AppState::new(config) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Failed to initialize platform client: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped with an error: {e}");
        process::exit(1);
    }
}

mod config;
mod inference;
mod routes;

use actix_web::{App, HttpServer, middleware::Logger, web};
use config::ServerConfig;
use inference::model::Model;
use routes::{configure_routes, cors};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServerConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    // The server must not come up without a model.
    let model = Model::load(&config).map_err(|e| {
        log::error!("Failed to load model at startup: {}", e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;
    let model = web::Data::new(model);

    let bind_address = config.bind_address();
    log::info!(
        "Starting server on {} (threshold {}, origins {:?})",
        bind_address,
        config.threshold,
        config.allowed_origins
    );

    let config = web::Data::new(config);
    HttpServer::new(move || {
        App::new()
            .wrap(cors(&config))
            .wrap(Logger::default())
            .app_data(model.clone())
            .app_data(config.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}

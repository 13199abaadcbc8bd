use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};

use business_review_core::config::Config;
use business_review_core::handlers;
use business_review_core::state::AppState;
use business_review_core::store::{MemoryStore, PgStore, Store};
use business_review_core::sweeper;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::from_env().map_err(|err| {
        log::error!("Invalid configuration: {err}");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;
    let bind_address = config.bind_address();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let store = PgStore::connect(database_url, config.db_max_connections)
                .await
                .map_err(|err| {
                    log::error!("Failed to initialize database: {err:?}");
                    std::io::Error::new(std::io::ErrorKind::Other, err)
                })?;
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set; using the in-memory store, data will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store, config.request_timeout);
    if let Some(interval) = config.sweep_interval {
        sweeper::spawn(state.promotions.clone(), interval);
        log::info!("Promotion sweep every {:?}", interval);
    }
    let state = web::Data::new(state);

    log::info!("🚀 Starting business review core on {}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}

extern crate env_logger;

use std::io;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{info, warn};

use irrigation_telemetry::api::{self, ApiSettings};
use irrigation_telemetry::config::ServerConfig;
use irrigation_telemetry::memory_database::MemoryStore;

fn invalid_data<E: ToString>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config_path = ServerConfig::default_path();
    let loaded = if config_path.exists() {
        Some(ServerConfig::load(&config_path))
    } else {
        None
    };
    let config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => ServerConfig::default(),
    };

    env_logger::init_from_env(
        env_logger::Env::new().default_filter_or(config.logging.level.clone()),
    );

    match loaded {
        Some(Ok(_)) => info!("Loaded config from {}", config_path.display()),
        Some(Err(err)) => warn!(
            "Failed to load {}: {} - using defaults",
            config_path.display(),
            err
        ),
        None => warn!("No config file at {} - using defaults", config_path.display()),
    }

    let store = match &config.store.seed_file {
        Some(path) => MemoryStore::from_seed_file(path).map_err(invalid_data)?,
        None => {
            warn!("No seed file configured, starting with an empty store");
            MemoryStore::new()
        }
    };

    let settings = ApiSettings {
        attributes: config.required_attributes().map_err(invalid_data)?,
        watch: config.watch.clone(),
    };
    let static_dir = config.http.static_dir.clone();

    info!("Listening on {}", config.http.bind);
    HttpServer::new(move || {
        let mut app = App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(settings.clone()))
            .configure(api::configure::<MemoryStore>);

        if let Some(dir) = &static_dir {
            app = app.service(
                actix_files::Files::new("/", dir)
                    .use_etag(true)
                    .index_file("index.html")
                    .default_handler(web::route().to(api::not_found)),
            );
        }

        app.default_service(web::route().to(api::not_found))
    })
    .bind(&config.http.bind)?
    .shutdown_timeout(60)
    .run()
    .await
}

use actix_cors::Cors;
use actix_web::{
    self,
    middleware::{from_fn, Logger},
    web, App, HttpServer,
};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::{
    configs::{connect_database, run_migrations},
    middlewares::authentication,
    modules::{
        friend::{
            model::FriendsConfig, panel::PanelRegistry, repository_pg::FriendshipStorePg,
            service::FriendService,
        },
        user::repository_pg::UserDirectoryPg,
    },
};

mod api;
mod configs;
mod constants;
mod middlewares;
mod modules;
#[cfg(test)]
mod test;
mod utils;

pub static ENV: LazyLock<constants::Env> = LazyLock::new(|| {
    dotenvy::dotenv().ok();
    let _ = env_logger::try_init();
    let _ = tracing_subscriber::fmt().try_init();
    log::info!("Environment variables loaded from .env file");
    constants::Env::default()
});

#[actix_web::get("/")]
async fn health_check() -> &'static str {
    "Server is running"
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let db_pool =
        connect_database().await.map_err(|_| std::io::Error::other("Database connection error"))?;
    run_migrations(&db_pool).await.map_err(|_| std::io::Error::other("Database migration error"))?;

    let friend_store = FriendshipStorePg::new(db_pool.clone());
    let user_directory = UserDirectoryPg::new(db_pool.clone());

    let friends_config = FriendsConfig::from_env(&ENV);
    let friend_service = FriendService::with_dependencies(
        Arc::new(friend_store),
        Arc::new(user_directory),
        friends_config,
    );
    let registry = web::Data::new(PanelRegistry::new(friend_service));

    let sweeper = registry.clone();
    let max_idle = friends_config.panel_idle;
    actix_web::rt::spawn(async move {
        let mut tick = tokio::time::interval(
            max_idle.clamp(Duration::from_secs(1), Duration::from_secs(60)),
        );
        loop {
            tick.tick().await;
            let evicted = sweeper.evict_idle(max_idle);
            if evicted > 0 {
                log::debug!("Evicted {} idle friends panels", evicted);
            }
        }
    });

    log::info!("Starting server at http://{}:{}", ENV.ip.as_str(), ENV.port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(ENV.frontend_url.as_str())
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(registry.clone())
            .service(health_check)
            .service(
                web::scope("/api")
                    .wrap(from_fn(authentication))
                    .configure(modules::friend::route::configure),
            )
    })
    .bind((ENV.ip.as_str(), ENV.port))?
    .workers(2)
    .run()
    .await
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use clubhouse_server::config::Config;
use clubhouse_server::handlers::AppState;
use clubhouse_server::payments::HostedCheckoutClient;
use clubhouse_server::routes::create_routes;
use clubhouse_server::services::notify::{NotificationDispatcher, SmtpMailer};
use clubhouse_server::services::scheduler;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let provider =
        Arc::new(HostedCheckoutClient::new(config.payment.clone()).expect("payment client"));
    let mailer = SmtpMailer::new(&config.smtp).expect("smtp mailer");
    let dispatcher = Arc::new(NotificationDispatcher::new(mailer));

    scheduler::spawn(pool.clone(), config.clone(), Arc::clone(&dispatcher));

    let state = AppState {
        pool,
        config,
        provider,
        dispatcher,
    };
    let app: Router = create_routes(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3001));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}

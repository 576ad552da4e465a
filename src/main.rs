mod config;
mod db;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use services::identity::{HttpIdentityProvider, IdentityProvider};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().expect("invalid configuration");
    let port = config.port;

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    // Delegated identity is optional: without it only local sessions authenticate.
    let identity: Option<Arc<dyn IdentityProvider>> = match config.identity.as_ref() {
        Some(identity_config) => {
            let provider = HttpIdentityProvider::new(identity_config).expect("identity provider init failed");
            tracing::info!(url = %identity_config.userinfo_url, "identity provider configured");
            Some(Arc::new(provider))
        }
        None => {
            tracing::warn!("IDENTITY_USERINFO_URL not set; delegated sign-in disabled");
            None
        }
    };
    if config.dev_auth_bypass {
        tracing::warn!("DEV_AUTH_BYPASS enabled: /api/dev/session issues sessions without credentials");
    }

    let state = state::AppState::new(pool, config, identity);

    let _sweeper = services::maintenance::spawn_session_sweeper(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "farmhand listening");
    axum::serve(listener, app).await.expect("server failed");
}

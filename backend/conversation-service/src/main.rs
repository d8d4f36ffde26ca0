use actix_middleware::{CorrelationIdMiddleware, MetricsMiddleware};
use actix_web::{web, App, HttpServer};
use conversation_service::{config, error, logging, routes, state::AppState, store};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;
    tracing::info!(config = ?cfg, "starting {}", config::SERVICE_NAME);

    let tokens = Arc::new(cfg.session_tokens()?);
    let store = store::connect(&cfg).await?;
    let state = web::Data::new(AppState::new(store));

    let bind_addr = cfg.bind_addr();
    tracing::info!(%bind_addr, "listening");

    HttpServer::new(move || {
        let tokens = tokens.clone();
        App::new()
            .wrap(CorrelationIdMiddleware)
            .wrap(MetricsMiddleware)
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(|cfg| routes::configure(cfg, tokens))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}

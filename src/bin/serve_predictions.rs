use std::{net::SocketAddr, sync::Arc};

use salescast::{
    init_logging, log_app_bind, log_app_start, logging_config_from_env,
    pipeline_config_from_env, serving_router, ModelSource, ServingCache,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("serve_predictions", &logging_cfg);

    let addr: SocketAddr = std::env::var("SALESCAST_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let cfg = pipeline_config_from_env()?;
    let source: Arc<dyn ModelSource> = Arc::new(ServingCache::new(
        &cfg.paths.artifact,
        &cfg.paths.reduced,
        cfg.target_column(),
    ));
    let app = serving_router(source);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

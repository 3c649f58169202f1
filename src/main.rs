use fanout::config::Config;
use fanout::server::http;
use fanout::FanoutEngine;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.server.log_level)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let engine = FanoutEngine::new(config);

    let app = http::router(engine.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind server address");
    info!(
        "fanout listening on {} (publish policy {})",
        addr,
        engine.registry.default_policy().as_str()
    );

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });
    if let Err(err) = serve.await {
        error!("server error: {}", err);
    }

    // Sessions are gone once the server stops accepting; tear down topics.
    engine.registry.close();
    info!("shutdown complete");
}

use gateway::bootstrap::{init_logging, init_metrics};
use gateway::config::ConfigLoader;
use gateway::filter::FilterFactory;
use gateway::proxy::DynamicProxy;
use gateway::state::AppState;
use gateway::api;
use pingora::prelude::*;
use std::sync::Arc;

fn main() {
    dotenvy::dotenv().ok();

    // 1. Logging (File + Stdout)
    let _guard = init_logging();
    tracing::info!("Starting filter-chain gateway...");

    let prometheus = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("⚠️ Metrics recorder not installed: {}", e);
            None
        }
    };

    // 2. Config + initial chain. Any unresolvable filter aborts startup.
    let config_path = ConfigLoader::path_from_env();
    let config = match ConfigLoader::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let listen = config.listen.clone();
    let admin_listen = config.admin_listen.clone();

    let state = match AppState::new(config, FilterFactory::standard()) {
        Ok(state) => Arc::new(state.with_config_path(config_path)),
        Err(e) => {
            tracing::error!("❌ Filter chain could not be built: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "✅ Filter chain ready: [{}]",
        state.snapshot().chain.names().collect::<Vec<_>>().join(", ")
    );

    // 3. Admin API on its own runtime; pingora owns the main thread.
    let rt = tokio::runtime::Runtime::new().expect("Failed to start admin runtime");
    let state_for_api = state.clone();
    rt.spawn(async move {
        let app = api::router(state_for_api, prometheus);
        match tokio::net::TcpListener::bind(&admin_listen).await {
            Ok(listener) => {
                tracing::info!("🎮 Control Plane (API) running on {}", admin_listen);
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("❌ Admin API stopped: {}", e);
                }
            }
            Err(e) => tracing::error!("❌ Cannot bind admin API on {}: {}", admin_listen, e),
        }
    });

    // 4. Data plane
    let mut server = Server::new(None).expect("Failed to create pingora server");
    server.bootstrap();

    let mut proxy = http_proxy_service(&server.configuration, DynamicProxy { state });
    proxy.add_tcp(&listen);

    server.add_service(proxy);
    tracing::info!("🚀 Data Plane (Proxy) running on {}", listen);
    server.run_forever();
}

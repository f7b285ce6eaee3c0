use std::sync::Arc;

use bulkscreen_engine::Reconciler;

#[tokio::main]
async fn main() {
    bulkscreen_observability::init();

    let services = Arc::new(bulkscreen_api::app::services::build_services().await);
    services
        .ensure_data_dirs()
        .await
        .expect("failed to create data directories");

    // Recover jobs orphaned by a previous unclean shutdown before
    // accepting new ones.
    let reconciler = Reconciler::new(services.store.clone());
    let recovered = reconciler
        .run()
        .await
        .expect("startup reconciliation failed");
    if recovered > 0 {
        tracing::info!(recovered, "failed orphaned jobs from previous run");
    }

    let app = bulkscreen_api::app::build_app(services);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

use anyhow::Result;
use axum::Router;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut registry = modelgate_provider_core::ProviderRegistry::new();
    modelgate_provider_impl::register_builtin_providers(&mut registry);

    let boot = modelgate_core::bootstrap_from_env(registry).await?;
    let global = boot.state.global.load();
    let bind = format!("{}:{}", global.host, global.port);

    let app = Router::new()
        .merge(modelgate_router::proxy_router(boot.state.clone()))
        .nest("/admin", modelgate_router::admin_router(boot.state.clone()));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "modelgate listening");
    axum::serve(listener, app).await?;
    Ok(())
}

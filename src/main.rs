use anyhow::Context;
use axum::Router;
use labor_law_rag::{api, app_state::AppState, config::AppConfig};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 3. Estado compartido; el índice se construye (o carga) antes de aceptar peticiones
    let app_state = AppState::new(cfg.clone(), shutdown_tx);
    let rag = app_state
        .rag()
        .await
        .context("Error inicializando el orquestador RAG")?;
    let stats = rag.index().stats();
    info!(
        "📚 Colección '{}' lista: {} documentos, {} vectores (dimensión {})",
        stats.collection, stats.documents, stats.vectors, stats.dimension
    );

    // 4. Configurar el router de la API
    let app = Router::new().merge(api::create_router(app_state)).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 5. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::oneshot;
use tracing::info;

use crate::{config::AppConfig, rag::RagFlow};

/// Celda de inicialización perezosa con doble comprobación: lectura sin
/// bloqueo, y si está vacía se toma el cerrojo y se vuelve a mirar antes de
/// construir. Un fallo deja la celda vacía para que el siguiente intento
/// vuelva a construir.
pub struct InitCell<T> {
    ready: RwLock<Option<Arc<T>>>,
    building: tokio::sync::Mutex<()>,
}

impl<T> Default for InitCell<T> {
    fn default() -> Self {
        Self {
            ready: RwLock::new(None),
            building: tokio::sync::Mutex::new(()),
        }
    }
}

impl<T> InitCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.ready
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let _guard = self.building.lock().await;
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let value = Arc::new(init().await?);
        *self
            .ready
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(value.clone());
        Ok(value)
    }
}

pub type OrchestratorCell = InitCell<RagFlow>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Arc<OrchestratorCell>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, shutdown_sender: oneshot::Sender<()>) -> Self {
        Self {
            config,
            orchestrator: Arc::new(OrchestratorCell::new()),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }

    /// Devuelve el orquestador, construyéndolo (ingesta incluida) la primera vez.
    pub async fn rag(&self) -> anyhow::Result<Arc<RagFlow>> {
        self.orchestrator
            .get_or_try_init(|| async {
                info!("Inicializando el orquestador RAG...");
                RagFlow::from_config(&self.config).await
            })
            .await
    }
}

//! Tipos de error del pipeline RAG.

use thiserror::Error;

/// Fallo de un adaptador remoto (embedding, rerank o LLM).
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Texto vacío: se rechaza antes de llamar al servicio remoto.
    #[error("entrada vacía para {0}")]
    EmptyInput(&'static str),

    #[error("{adapter} no disponible: {reason}")]
    Unavailable { adapter: String, reason: String },

    /// El servicio rechazó la petición (credenciales, modelo inexistente...).
    #[error("{adapter} rechazó la petición: {reason}")]
    Rejected { adapter: String, reason: String },

    #[error("respuesta inválida de {adapter}: {reason}")]
    InvalidResponse { adapter: String, reason: String },

    #[error("dimensión de embedding inconsistente: esperada {expected}, recibida {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{adapter} superó el tiempo límite de {secs}s")]
    Timeout { adapter: String, secs: u64 },

    #[error("operación no soportada: {0}")]
    Unsupported(&'static str),
}

impl AdapterError {
    pub fn unavailable(adapter: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            adapter: adapter.into(),
            reason: reason.to_string(),
        }
    }

    pub fn rejected(adapter: impl Into<String>, reason: impl ToString) -> Self {
        Self::Rejected {
            adapter: adapter.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_response(adapter: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidResponse {
            adapter: adapter.into(),
            reason: reason.to_string(),
        }
    }

    /// Los errores de uso y de contrato no se reintentan.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Documento de entrada con estructura inválida.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("el fichero {file} no cumple el esquema: {reason}")]
pub struct SchemaViolation {
    pub file: String,
    pub reason: String,
}

/// Errores del índice persistido.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("índice corrupto: {0}")]
    Corrupt(String),
}

/// Errores fatales de la ingesta.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("io error en {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No hay nodos válidos ni índice previo: no se pueden servir consultas.
    #[error("no se generó ningún nodo a partir de {0} y no existe índice persistido")]
    NoNodes(String),

    #[error("fallo de embedding durante la ingesta: {0}")]
    Embedding(#[from] AdapterError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Configuración ausente o inválida (fatal al arrancar).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("falta {0} en el entorno")]
    Missing(&'static str),

    #[error("valor inválido para {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(var: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            var,
            reason: reason.to_string(),
        }
    }
}

//! Carga y gestión de configuración de la aplicación (proveedores + parámetros RAG).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_BAIDU_EMBEDDING_URL: &str = "https://qianfan.baidubce.com/v2/embeddings";
pub const DEFAULT_BAIDU_RERANK_URL: &str =
    "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop/reranker";
pub const DEFAULT_ZHIPU_CHAT_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

const DEFAULT_TOPIC_KEYWORDS: [&str; 8] = [
    "劳动法", "合同", "工资", "工伤", "解除", "赔偿", "用人单位", "劳动者",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Baidu,
    OpenAI,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RerankProvider {
    Baidu,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Zhipu,
    OpenAI,
}

impl EmbeddingProvider {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "baidu" => Ok(Self::Baidu),
            "openai" => Ok(Self::OpenAI),
            other => Err(ConfigError::invalid("EMBEDDING_PROVIDER", format!("proveedor no soportado: {other}"))),
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Baidu => "bge-large-zh",
            Self::OpenAI => "text-embedding-3-small",
        }
    }
}

impl RerankProvider {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "baidu" => Ok(Self::Baidu),
            other => Err(ConfigError::invalid("RERANK_PROVIDER", format!("proveedor no soportado: {other}"))),
        }
    }
}

impl LlmProvider {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "zhipu" => Ok(Self::Zhipu),
            "openai" => Ok(Self::OpenAI),
            other => Err(ConfigError::invalid("LLM_PROVIDER", format!("proveedor no soportado: {other}"))),
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Zhipu => "GLM-4-Plus",
            Self::OpenAI => "gpt-4o-mini",
        }
    }
}

/// Credenciales y endpoints de los proveedores remotos.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub baidu_api_key: Option<String>,
    pub zhipu_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Endpoints {
    pub baidu_embedding: Url,
    pub baidu_rerank: Url,
    pub zhipu_chat: Url,
}

/// Parámetros del pipeline de consulta.
#[derive(Clone, Debug, PartialEq)]
pub struct RagParams {
    pub top_k: usize,
    pub hybrid_alpha: f64,
    pub rerank_top_n: usize,
    pub rerank_min_score: f64,
    pub temperature: f64,
    pub top_p: f64,
    pub topic_keywords: Vec<String>,
}

impl Default for RagParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            hybrid_alpha: 0.5,
            rerank_top_n: 3,
            rerank_min_score: 0.3,
            temperature: 0.3,
            top_p: 0.9,
            topic_keywords: DEFAULT_TOPIC_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub data_dir: PathBuf,
    pub persist_dir: PathBuf,
    pub collection_name: String,

    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: String,
    pub embed_batch_size: usize,
    pub rerank_provider: RerankProvider,
    pub rerank_model: String,
    pub llm_provider: LlmProvider,
    pub llm_model: String,

    pub credentials: Credentials,
    pub endpoints: Endpoints,

    pub request_timeout: Duration,
    pub max_retries: u32,

    pub rag: RagParams,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo las variables a través de `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let data_dir = PathBuf::from(or("DATA_DIR", "data"));
        let persist_dir = get("PERSIST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("storage"));

        let embedding_provider = EmbeddingProvider::parse(&or("EMBEDDING_PROVIDER", "baidu"))?;
        let embedding_model = or("EMBEDDING_MODEL", embedding_provider.default_model());
        let rerank_provider = RerankProvider::parse(&or("RERANK_PROVIDER", "baidu"))?;
        let rerank_model = or("RERANK_MODEL", "bce_reranker_base");
        let llm_provider = LlmProvider::parse(&or("LLM_PROVIDER", "zhipu"))?;
        let llm_model = or("LLM_MODEL", llm_provider.default_model());

        let credentials = Credentials {
            baidu_api_key: get("BAIDU_API_KEY"),
            zhipu_api_key: get("ZHIPU_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
        };

        let endpoints = Endpoints {
            baidu_embedding: parse_url("BAIDU_EMBEDDING_URL", &or("BAIDU_EMBEDDING_URL", DEFAULT_BAIDU_EMBEDDING_URL))?,
            baidu_rerank: parse_url("BAIDU_RERANK_URL", &or("BAIDU_RERANK_URL", DEFAULT_BAIDU_RERANK_URL))?,
            zhipu_chat: parse_url("ZHIPU_CHAT_URL", &or("ZHIPU_CHAT_URL", DEFAULT_ZHIPU_CHAT_URL))?,
        };

        let defaults = RagParams::default();
        let topic_keywords = match get("TOPIC_KEYWORDS") {
            Some(list) => list
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            None => defaults.topic_keywords,
        };
        let rag = RagParams {
            top_k: parse_num(&get, "RAG_TOP_K", defaults.top_k)?,
            hybrid_alpha: parse_num(&get, "RAG_HYBRID_ALPHA", defaults.hybrid_alpha)?,
            rerank_top_n: parse_num(&get, "RAG_RERANK_TOP_N", defaults.rerank_top_n)?,
            rerank_min_score: parse_num(&get, "RAG_RERANK_MIN_SCORE", defaults.rerank_min_score)?,
            temperature: parse_num(&get, "LLM_TEMPERATURE", defaults.temperature)?,
            top_p: parse_num(&get, "LLM_TOP_P", defaults.top_p)?,
            topic_keywords,
        };
        if !(0.0..=1.0).contains(&rag.hybrid_alpha) {
            return Err(ConfigError::invalid("RAG_HYBRID_ALPHA", "debe estar entre 0 y 1"));
        }
        if rag.top_k == 0 || rag.rerank_top_n == 0 {
            return Err(ConfigError::invalid("RAG_TOP_K/RAG_RERANK_TOP_N", "deben ser mayores que 0"));
        }

        let embed_batch_size = parse_num(&get, "EMBED_BATCH_SIZE", 10usize)?.max(1);
        let request_timeout = Duration::from_secs(parse_num(&get, "REQUEST_TIMEOUT_SECS", 30u64)?);
        let max_retries = parse_num(&get, "MAX_RETRIES", 2u32)?;

        Ok(Self {
            server_addr: or("SERVER_ADDR", "127.0.0.1:3322"),
            data_dir,
            persist_dir,
            collection_name: or("COLLECTION_NAME", "chinese_labor_laws"),
            embedding_provider,
            embedding_model,
            embed_batch_size,
            rerank_provider,
            rerank_model,
            llm_provider,
            llm_model,
            credentials,
            endpoints,
            request_timeout,
            max_retries,
            rag,
        })
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::invalid(var, e.to_string()))
}

fn parse_num<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_follow_the_labor_law_deployment() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.collection_name, "chinese_labor_laws");
        assert_eq!(cfg.persist_dir, PathBuf::from("data").join("storage"));
        assert_eq!(cfg.embedding_provider, EmbeddingProvider::Baidu);
        assert_eq!(cfg.embedding_model, "bge-large-zh");
        assert_eq!(cfg.llm_model, "GLM-4-Plus");
        assert_eq!(cfg.rag, RagParams::default());
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("LLM_PROVIDER", "OpenAI"),
            ("RAG_TOP_K", "20"),
            ("RAG_HYBRID_ALPHA", "0.7"),
            ("TOPIC_KEYWORDS", "工资, 加班 ,"),
            ("PERSIST_DIR", "/tmp/idx"),
        ]))
        .unwrap();
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
        assert_eq!(cfg.llm_model, "gpt-4o-mini");
        assert_eq!(cfg.rag.top_k, 20);
        assert_eq!(cfg.rag.hybrid_alpha, 0.7);
        assert_eq!(cfg.rag.topic_keywords, vec!["工资", "加班"]);
        assert_eq!(cfg.persist_dir, PathBuf::from("/tmp/idx"));
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let err = AppConfig::from_lookup(lookup(&[("RAG_HYBRID_ALPHA", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RAG_HYBRID_ALPHA", .. }));
    }

    #[test]
    fn rejects_unknown_provider_and_bad_numbers() {
        assert!(AppConfig::from_lookup(lookup(&[("LLM_PROVIDER", "gemini")])).is_err());
        let err = AppConfig::from_lookup(lookup(&[("RAG_TOP_K", "diez")])).unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));
    }
}

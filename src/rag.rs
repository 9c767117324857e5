//! Orquestador de consultas RAG.
//!
//! Flujo por pregunta:
//!   1. Búsqueda híbrida (vector + BM25) de los `top_k` artículos candidatos.
//!   2. Rerank remoto y descarte de los que no superan `rerank_min_score`.
//!   3. Si no queda ninguno se responde con un mensaje fijo sin llamar al LLM.
//!   4. El LLM redacta la respuesta usando sólo los artículos supervivientes.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::{AppConfig, RagParams};
use crate::embedding::Embedder;
use crate::error::AdapterError;
use crate::ingest;
use crate::llm::{ChatMessage, GenerationOptions, LanguageModel};
use crate::models::{Answer, AnswerStatus, ScoredNode};
use crate::providers;
use crate::rerank::Reranker;
use crate::vector_store::VectorIndex;

pub const NO_RELEVANT_TEXT: &str = "⚠️ 未找到相关法律条文，请尝试调整问题描述或咨询专业律师。";
pub const GENERATION_FAILED: &str = "⚠️ 暂时无法生成回答，请稍后重试。";
pub const OUT_OF_SCOPE: &str = "对不起，我暂时无法回答劳动法之外的问题哦～";

const SYSTEM_PROMPT: &str = "你是一名专业的中国劳动法咨询助手。\
只能依据提供的法律条文作答，回答需清晰、准确，并注明引用的法律名称与条款。\
如果条文不足以回答问题，请明确说明无法确定，并建议咨询专业律师。";

/// Ejecuta `fut` registrando cuánto tardó la etapa.
async fn timed<F: Future>(stage: &str, fut: F) -> F::Output {
    let started = Instant::now();
    let out = fut.await;
    info!("Etapa {stage} completada en {:.3} ms", started.elapsed().as_secs_f64() * 1000.0);
    out
}

fn build_context(nodes: &[ScoredNode]) -> String {
    nodes
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            let meta = &scored.node.metadata;
            format!(
                "[{}] {}\n来源文件：{} | 法律名称：{}\n{}",
                i + 1,
                meta.full_title,
                meta.source_file,
                meta.law_name,
                scored.node.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn build_prompt(question: &str, nodes: &[ScoredNode]) -> String {
    format!(
        "以下是相关法律条文：\n---------------------\n{}\n---------------------\n请仅根据上述法律条文而非先验知识回答问题。\n问题：{}\n回答：",
        build_context(nodes),
        question
    )
}

/// Instancia única por proceso: adaptadores + índice, de sólo lectura tras
/// construirse.
pub struct RagFlow {
    embedder: Embedder,
    reranker: Reranker,
    llm: Arc<dyn LanguageModel>,
    index: VectorIndex,
    params: RagParams,
}

impl RagFlow {
    pub fn new(
        embedder: Embedder,
        reranker: Reranker,
        llm: Arc<dyn LanguageModel>,
        index: VectorIndex,
        params: RagParams,
    ) -> Self {
        Self {
            embedder,
            reranker,
            llm,
            index,
            params,
        }
    }

    /// Construye los adaptadores configurados y carga (o crea) el índice.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let embedder = Embedder::new(providers::embedding_from_config(cfg)?, cfg.embed_batch_size);
        let reranker = Reranker::new(providers::rerank_from_config(cfg)?);
        let llm = providers::llm_from_config(cfg)?;

        let (index, report) = timed(
            "build_or_load",
            ingest::build_or_load(&embedder, &cfg.data_dir, &cfg.persist_dir, &cfg.collection_name),
        )
        .await?;
        if !report.violations.is_empty() {
            warn!("{} ficheros descartados por no cumplir el esquema", report.violations.len());
        }

        Ok(Self::new(embedder, reranker, llm, index, cfg.rag.clone()))
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn params(&self) -> &RagParams {
        &self.params
    }

    /// Búsqueda híbrida inicial; las puntuaciones se sobrescriben en el rerank.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredNode>, AdapterError> {
        timed("retrieve", async {
            let query_vector = self.embedder.embed_one(question).await?;
            Ok::<_, AdapterError>(self.index.hybrid_search(
                &query_vector,
                question,
                self.params.top_k,
                self.params.hybrid_alpha,
            ))
        })
        .await
    }

    /// Rerank y filtro por umbral: sólo sobreviven `score > rerank_min_score`.
    /// El umbral se aplica a puntuaciones de rerank; si el servicio cayó, los
    /// candidatos de la recuperación pasan sin filtrar.
    pub async fn rerank(&self, question: &str, nodes: Vec<ScoredNode>) -> Vec<ScoredNode> {
        timed("rerank", async {
            let min_score = self.params.rerank_min_score;
            let reranked = self
                .reranker
                .rerank(question, nodes, self.params.rerank_top_n)
                .await;
            if reranked.fallback {
                warn!("Sin puntuaciones de rerank; se usan {} candidatos sin umbral", reranked.nodes.len());
                return reranked.nodes;
            }
            reranked.nodes.into_iter().filter(|n| n.score > min_score).collect()
        })
        .await
    }

    pub async fn synthesize(&self, question: &str, nodes: &[ScoredNode]) -> Result<String, AdapterError> {
        timed("synthesize", async {
            let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(build_prompt(question, nodes))];
            let options = GenerationOptions::from(&self.params);
            self.llm.chat(&messages, &options).await
        })
        .await
    }

    /// Pipeline completo. Los fallos por consulta se convierten en una
    /// respuesta degradada; nunca se propagan al llamante.
    pub async fn answer(&self, question: &str) -> Answer {
        let candidates = match self.retrieve(question).await {
            Ok(candidates) => candidates,
            Err(err) => {
                error!("Fallo en la recuperación: {err}");
                Vec::new()
            }
        };
        info!("Recuperados {} candidatos", candidates.len());

        let nodes = self.rerank(question, candidates).await;
        if nodes.is_empty() {
            info!("Ningún artículo supera el umbral {}", self.params.rerank_min_score);
            return Answer::new(AnswerStatus::NoRelevantText, NO_RELEVANT_TEXT, Vec::new());
        }

        match self.synthesize(question, &nodes).await {
            Ok(text) => Answer::new(AnswerStatus::Answered, text, nodes),
            Err(err) => {
                error!("No se pudo generar la respuesta: {err}");
                Answer::new(AnswerStatus::GenerationFailed, GENERATION_FAILED, nodes)
            }
        }
    }

    /// La pregunta menciona alguna palabra clave del ámbito (o no hay lista).
    pub fn is_in_scope(&self, question: &str) -> bool {
        let keywords = &self.params.topic_keywords;
        keywords.is_empty() || keywords.iter().any(|k| question.contains(k.as_str()))
    }

    /// Punto de entrada del servicio: filtra preguntas fuera del ámbito
    /// laboral antes de ejecutar el pipeline.
    pub async fn consult(&self, question: &str) -> Answer {
        let question = question.trim();
        info!("Pregunta del usuario: {question}");
        if !self.is_in_scope(question) {
            return Answer::new(AnswerStatus::OutOfScope, OUT_OF_SCOPE, Vec::new());
        }
        let answer = self.answer(question).await;
        info!("Respuesta ({:?}): {}", answer.status, answer.reply);
        answer
    }
}

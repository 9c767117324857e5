//! Modelos de dominio: entradas de origen, nodos legales y respuestas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNKNOWN_LAW: &str = "未知法律";
pub const UNKNOWN_ARTICLE: &str = "未知条款";
pub const LEGAL_ARTICLE: &str = "legal_article";

/// Un objeto `{título completo: texto}` leído de un fichero fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub source_file: String,
    pub content: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub law_name: String,
    pub article: String,
    pub full_title: String,
    pub source_file: String,
    pub content_type: String,
}

/// Unidad atómica recuperable: un artículo de ley con id estable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub text: String,
    pub metadata: NodeMetadata,
}

impl Node {
    /// Construye el nodo de `full_title` dentro de `source_file`.
    /// El id sólo depende de ambos, así que re-ingerir produce los mismos ids.
    pub fn legal_article(source_file: &str, full_title: &str, text: &str) -> Self {
        let (law_name, article) = split_title(full_title);
        Self {
            id: node_id(source_file, full_title),
            text: text.to_string(),
            metadata: NodeMetadata {
                law_name,
                article,
                full_title: full_title.to_string(),
                source_file: source_file.to_string(),
                content_type: LEGAL_ARTICLE.to_string(),
            },
        }
    }
}

pub fn node_id(source_file: &str, full_title: &str) -> String {
    format!("{source_file}::{full_title}")
}

/// "劳动法 第一条" -> ("劳动法", "第一条"), partiendo por el primer espacio.
fn split_title(full_title: &str) -> (String, String) {
    let mut parts = full_title.splitn(2, ' ');
    let law = parts.next().filter(|p| !p.is_empty()).unwrap_or(UNKNOWN_LAW);
    let article = parts.next().filter(|p| !p.is_empty()).unwrap_or(UNKNOWN_ARTICLE);
    (law.to_string(), article.to_string())
}

/// Nodo con puntuación de relevancia, sólo vive durante una consulta.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
}

impl ScoredNode {
    pub fn new(node: Node, score: f64) -> Self {
        Self { node, score }
    }
}

/// Forma serializable de una cita devuelta al cliente.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub node_id: String,
    pub score: f64,
    pub law_name: String,
    pub article: String,
    pub full_title: String,
    pub source_file: String,
    pub text: String,
}

impl From<&ScoredNode> for Citation {
    fn from(scored: &ScoredNode) -> Self {
        let meta = &scored.node.metadata;
        Self {
            node_id: scored.node.id.clone(),
            score: scored.score,
            law_name: meta.law_name.clone(),
            article: meta.article.clone(),
            full_title: meta.full_title.clone(),
            source_file: meta.source_file.clone(),
            text: scored.node.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answered,
    NoRelevantText,
    GenerationFailed,
    OutOfScope,
}

/// Resultado final de una consulta.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub status: AnswerStatus,
    /// Salida tal cual la devolvió el modelo (o el mensaje fijo).
    pub text: String,
    /// Texto sin los bloques `<think>`.
    pub reply: String,
    /// Contenido de los bloques `<think>`, en orden.
    pub reasoning: Vec<String>,
    pub citations: Vec<ScoredNode>,
}

impl Answer {
    pub fn new(status: AnswerStatus, text: impl Into<String>, citations: Vec<ScoredNode>) -> Self {
        let text = text.into();
        let (reply, reasoning) = split_reasoning(&text);
        Self {
            status,
            text,
            reply,
            reasoning,
            citations,
        }
    }

    pub fn citation_records(&self) -> Vec<Citation> {
        self.citations.iter().map(Citation::from).collect()
    }
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Separa los bloques `<think>...</think>` del texto visible.
/// Un bloque sin cierre se deja tal cual en la respuesta.
pub fn split_reasoning(text: &str) -> (String, Vec<String>) {
    let mut reply = String::with_capacity(text.len());
    let mut reasoning = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(THINK_OPEN) {
        let after_open = &rest[start + THINK_OPEN.len()..];
        match after_open.find(THINK_CLOSE) {
            Some(end) => {
                reply.push_str(&rest[..start]);
                reasoning.push(after_open[..end].to_string());
                rest = &after_open[end + THINK_CLOSE.len()..];
            }
            None => break,
        }
    }
    reply.push_str(rest);
    (reply.trim().to_string(), reasoning)
}

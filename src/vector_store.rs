//! Índice persistido: vector store (id → embedding, métrica coseno) y
//! docstore (id → Node) guardados juntos en un único snapshot por colección.
//!
//! API pública:
//!   - `VectorIndex::build` / `VectorIndex::load` / `VectorIndex::persist`
//!   - `VectorIndex::hybrid_search`

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::lexical::Bm25Index;
use crate::models::{Node, ScoredNode};

pub const METRIC: &str = "cosine";
const SNAPSHOT_SUFFIX: &str = ".index.json";

/// Registro del vector store: se guarda también el texto para poder
/// comprobar que coincide con el docstore al cargar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    collection: String,
    metric: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    vectors: Vec<VectorRecord>,
    docstore: BTreeMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub documents: usize,
    pub vectors: usize,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
}

pub struct VectorIndex {
    collection: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    vectors: BTreeMap<String, Vec<f64>>,
    docstore: BTreeMap<String, Node>,
    lexical: Bm25Index,
}

impl VectorIndex {
    pub fn snapshot_path(persist_dir: &Path, collection: &str) -> PathBuf {
        persist_dir.join(format!("{collection}{SNAPSHOT_SUFFIX}"))
    }

    /// Construye el índice en memoria a partir de nodos ya embebidos.
    pub fn build(collection: &str, embedded: Vec<(Node, Vec<f64>)>) -> Result<Self, IndexError> {
        let dimension = embedded.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut vectors = BTreeMap::new();
        let mut docstore = BTreeMap::new();

        for (node, vector) in embedded {
            if vector.len() != dimension {
                return Err(IndexError::Corrupt(format!(
                    "el nodo {} tiene dimensión {} (esperada {dimension})",
                    node.id,
                    vector.len()
                )));
            }
            vectors.insert(node.id.clone(), vector);
            docstore.insert(node.id.clone(), node);
        }

        Ok(Self::assemble(collection.to_string(), dimension, Utc::now(), vectors, docstore))
    }

    fn assemble(
        collection: String,
        dimension: usize,
        created_at: DateTime<Utc>,
        vectors: BTreeMap<String, Vec<f64>>,
        docstore: BTreeMap<String, Node>,
    ) -> Self {
        let mut lexical = Bm25Index::new();
        for node in docstore.values() {
            lexical.insert(&node.id, &node.text);
        }
        Self {
            collection,
            dimension,
            created_at,
            vectors,
            docstore,
            lexical,
        }
    }

    /// Carga el snapshot de `collection`; `None` si aún no existe.
    pub fn load(persist_dir: &Path, collection: &str) -> Result<Option<Self>, IndexError> {
        let path = Self::snapshot_path(persist_dir, collection);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(&path)?;
        let snapshot: IndexSnapshot = serde_json::from_slice(&raw)?;
        if snapshot.collection != collection {
            return Err(IndexError::Corrupt(format!(
                "el snapshot {} pertenece a la colección '{}'",
                path.display(),
                snapshot.collection
            )));
        }
        if snapshot.metric != METRIC {
            return Err(IndexError::Corrupt(format!("métrica no soportada: {}", snapshot.metric)));
        }

        let mut vectors = BTreeMap::new();
        for record in snapshot.vectors {
            match snapshot.docstore.get(&record.id) {
                Some(node) if node.text == record.text => {}
                Some(_) => {
                    return Err(IndexError::Corrupt(format!("el texto del vector {} no coincide con el docstore", record.id)))
                }
                None => return Err(IndexError::Corrupt(format!("vector huérfano: {}", record.id))),
            }
            if record.embedding.len() != snapshot.dimension {
                return Err(IndexError::Corrupt(format!(
                    "el vector {} tiene dimensión {} (esperada {})",
                    record.id,
                    record.embedding.len(),
                    snapshot.dimension
                )));
            }
            vectors.insert(record.id, record.embedding);
        }

        info!("Índice '{collection}' cargado desde {}", path.display());
        Ok(Some(Self::assemble(
            snapshot.collection,
            snapshot.dimension,
            snapshot.created_at,
            vectors,
            snapshot.docstore,
        )))
    }

    /// Escribe el snapshot completo en una sola operación atómica
    /// (fichero temporal + rename).
    pub fn persist(&self, persist_dir: &Path) -> Result<PathBuf, IndexError> {
        fs::create_dir_all(persist_dir)?;
        let path = Self::snapshot_path(persist_dir, &self.collection);
        let tmp = path.with_extension("json.tmp");

        let snapshot = IndexSnapshot {
            collection: self.collection.clone(),
            metric: METRIC.to_string(),
            dimension: self.dimension,
            created_at: self.created_at,
            vectors: self
                .vectors
                .iter()
                .filter_map(|(id, embedding)| {
                    let node = self.docstore.get(id)?;
                    Some(VectorRecord {
                        id: id.clone(),
                        text: node.text.clone(),
                        embedding: embedding.clone(),
                    })
                })
                .collect(),
            docstore: self.docstore.clone(),
        };

        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, &snapshot)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!("Snapshot escrito en {}", path.display());
        Ok(path)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn doc_count(&self) -> usize {
        self.docstore.len()
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn sample_id(&self) -> Option<&str> {
        self.docstore.keys().next().map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.docstore.get(id)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            collection: self.collection.clone(),
            documents: self.doc_count(),
            vectors: self.vector_count(),
            dimension: self.dimension,
            created_at: self.created_at,
        }
    }

    /// Búsqueda híbrida: `alpha * denso + (1 - alpha) * léxico`, cada señal
    /// normalizada por su máximo. Devuelve como mucho `top_k` nodos.
    pub fn hybrid_search(&self, query_vector: &[f64], query_text: &str, top_k: usize, alpha: f64) -> Vec<ScoredNode> {
        let alpha = alpha.clamp(0.0, 1.0);

        let dense: BTreeMap<&str, f64> = self
            .vectors
            .iter()
            .map(|(id, v)| (id.as_str(), cosine_similarity(query_vector, v).max(0.0)))
            .collect();
        let d_max = dense.values().copied().fold(0.0f64, f64::max);

        let sparse = self.lexical.scores(query_text);
        let s_max = sparse.values().copied().fold(0.0f64, f64::max);

        let mut fused: Vec<(&str, f64)> = dense
            .iter()
            .map(|(id, &d)| {
                let d = if d_max > 0.0 { d / d_max } else { 0.0 };
                let s = match sparse.get(*id) {
                    Some(&s) if s_max > 0.0 => s / s_max,
                    _ => 0.0,
                };
                (*id, alpha * d + (1.0 - alpha) * s)
            })
            .collect();

        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        fused.truncate(top_k);

        fused
            .into_iter()
            .filter_map(|(id, score)| Some(ScoredNode::new(self.docstore.get(id)?.clone(), score)))
            .collect()
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Vec<(Node, Vec<f64>)> {
        vec![
            (Node::legal_article("laws.json", "劳动法 第一条", "为了保护劳动者的合法权益"), vec![1.0, 0.0, 0.0]),
            (Node::legal_article("laws.json", "劳动法 第五十条", "工资应当以货币形式按月支付给劳动者本人"), vec![0.0, 1.0, 0.0]),
            (Node::legal_article("other.json", "合同法 第五十二条", "有下列情形之一的，合同无效"), vec![0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn persist_then_load_preserves_both_stores() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::build("laws", sample()).unwrap();
        let path = index.persist(dir.path()).unwrap();
        assert!(path.ends_with("laws.index.json"));
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = VectorIndex::load(dir.path(), "laws").unwrap().unwrap();
        assert_eq!(loaded.doc_count(), 3);
        assert_eq!(loaded.vector_count(), 3);
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.stats(), index.stats());
        assert_eq!(loaded.get("laws.json::劳动法 第一条").unwrap().metadata.article, "第一条");
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(VectorIndex::load(dir.path(), "laws").unwrap().is_none());
    }

    #[test]
    fn orphan_vectors_are_rejected() {
        let dir = tempdir().unwrap();
        let index = VectorIndex::build("laws", sample()).unwrap();
        let path = index.persist(dir.path()).unwrap();

        let mut raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        raw["docstore"].as_object_mut().unwrap().remove("laws.json::劳动法 第一条");
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        assert!(matches!(VectorIndex::load(dir.path(), "laws"), Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn mixed_dimensions_cannot_be_built() {
        let mut nodes = sample();
        nodes[1].1 = vec![1.0];
        assert!(VectorIndex::build("laws", nodes).is_err());
    }

    #[test]
    fn dense_only_search_ranks_by_cosine() {
        let index = VectorIndex::build("laws", sample()).unwrap();
        let hits = index.hybrid_search(&[0.1, 0.9, 0.0], "", 2, 1.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node.metadata.article, "第五十条");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn lexical_signal_moves_matching_text_up() {
        let index = VectorIndex::build("laws", sample()).unwrap();
        // El vector apunta al artículo de contratos, el texto a los salarios.
        let dense_only = index.hybrid_search(&[0.0, 0.2, 1.0], "工资按月支付", 1, 1.0);
        assert_eq!(dense_only[0].node.metadata.law_name, "合同法");

        let hybrid = index.hybrid_search(&[0.0, 0.2, 1.0], "工资按月支付", 1, 0.3);
        assert_eq!(hybrid[0].node.metadata.article, "第五十条");
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }
}

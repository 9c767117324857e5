//! Ingesta de los ficheros JSON de leyes y construcción (o carga) del índice
//! persistido.
//!
//! Cada fichero debe ser una lista de objetos `{"<ley> <artículo>": "<texto>"}`.
//! Un fichero que no cumple el esquema se descarta entero y se informa; el
//! resto se sigue ingiriendo.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::embedding::Embedder;
use crate::error::{AdapterError, IngestError, SchemaViolation};
use crate::models::{Node, SourceEntry};
use crate::vector_store::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexOutcome {
    #[default]
    Built,
    Loaded,
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub outcome: IndexOutcome,
    pub files_scanned: usize,
    pub files_ingested: usize,
    pub files_rejected: usize,
    pub nodes_built: usize,
    pub nodes_embedded: usize,
    pub nodes_skipped: usize,
    pub documents: usize,
    pub violations: Vec<SchemaViolation>,
}

impl std::fmt::Display for IngestionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.outcome {
            IndexOutcome::Loaded => write!(f, "Índice existente cargado: {} documentos.", self.documents),
            IndexOutcome::Built => write!(
                f,
                "Resumen: {} ficheros escaneados, {} ingeridos, {} rechazados. {} nodos generados, {} embebidos, {} omitidos. {} documentos en el índice.",
                self.files_scanned,
                self.files_ingested,
                self.files_rejected,
                self.nodes_built,
                self.nodes_embedded,
                self.nodes_skipped,
                self.documents
            ),
        }
    }
}

/// Valida un documento y devuelve sus entradas, o la primera violación.
pub fn validate_document(file_name: &str, raw: &str) -> Result<Vec<SourceEntry>, SchemaViolation> {
    let violation = |reason: String| SchemaViolation {
        file: file_name.to_string(),
        reason,
    };

    let root: Value = serde_json::from_str(raw).map_err(|e| violation(format!("JSON inválido: {e}")))?;
    let Value::Array(items) = root else {
        return Err(violation("el elemento raíz debe ser una lista".into()));
    };

    let mut entries = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        let Value::Object(map) = item else {
            return Err(violation(format!("el elemento {position} no es un objeto")));
        };
        let mut content = BTreeMap::new();
        for (key, value) in map {
            match value {
                Value::String(text) => {
                    content.insert(key, text);
                }
                _ => return Err(violation(format!("el valor de la clave '{key}' no es una cadena"))),
            }
        }
        entries.push(SourceEntry {
            source_file: file_name.to_string(),
            content,
        });
    }
    Ok(entries)
}

/// Resultado del escaneo del directorio de datos.
#[derive(Debug, Default)]
pub struct SourceScan {
    pub entries: Vec<SourceEntry>,
    pub files_scanned: usize,
    pub files_ingested: usize,
    pub violations: Vec<SchemaViolation>,
}

/// Lee los `*.json` de primer nivel de `source_dir`, en orden de nombre.
pub fn scan_sources(source_dir: &Path) -> SourceScan {
    let mut scan = SourceScan::default();
    if !source_dir.is_dir() {
        error!("No existe el directorio de datos {}", source_dir.display());
        return scan;
    }

    let files: Vec<_> = WalkDir::new(source_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")))
        .collect();

    if files.is_empty() {
        error!("No se encontraron ficheros JSON en {}", source_dir.display());
    }

    for entry in files {
        scan.files_scanned += 1;
        let file_name = entry.file_name().to_string_lossy().to_string();

        let parsed = fs::read_to_string(entry.path())
            .map_err(|e| SchemaViolation {
                file: file_name.clone(),
                reason: format!("no se pudo leer: {e}"),
            })
            .and_then(|raw| validate_document(&file_name, &raw));

        match parsed {
            Ok(entries) => {
                scan.files_ingested += 1;
                scan.entries.extend(entries);
            }
            Err(violation) => {
                error!("{violation}");
                scan.violations.push(violation);
            }
        }
    }

    info!("Cargadas {} entradas de {} ficheros", scan.entries.len(), scan.files_ingested);
    scan
}

/// Un nodo por par (título, texto). Ids repetidos se sobrescriben.
pub fn build_nodes(entries: &[SourceEntry]) -> Vec<Node> {
    let mut nodes: BTreeMap<String, Node> = BTreeMap::new();
    for entry in entries {
        for (full_title, text) in &entry.content {
            let node = Node::legal_article(&entry.source_file, full_title, text);
            if nodes.insert(node.id.clone(), node).is_some() {
                warn!("Id de nodo duplicado, se conserva el último: {}::{}", entry.source_file, full_title);
            }
        }
    }
    let nodes: Vec<Node> = nodes.into_values().collect();
    if let Some(first) = nodes.first() {
        info!("Generados {} nodos (id de ejemplo: {})", nodes.len(), first.id);
    }
    nodes
}

/// Embebe los nodos por lotes. Si un lote falla se reintenta nodo a nodo;
/// los nodos que siguen fallando quedan fuera del índice.
pub async fn embed_nodes(
    embedder: &Embedder,
    nodes: Vec<Node>,
) -> (Vec<(Node, Vec<f64>)>, usize, Option<AdapterError>) {
    let total = nodes.len();
    let batch_size = embedder.batch_size();
    let mut embedded = Vec::with_capacity(total);
    let mut skipped = 0;
    let mut last_error = None;

    let mut done = 0;
    let mut pending = nodes.into_iter().peekable();
    while pending.peek().is_some() {
        let batch: Vec<Node> = pending.by_ref().take(batch_size).collect();
        let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
        done += batch.len();

        match embedder.embed_many(&texts).await {
            Ok(vectors) => embedded.extend(batch.into_iter().zip(vectors)),
            Err(err) => {
                warn!("Lote de {} nodos fallido ({err}); se reintenta nodo a nodo", batch.len());
                for node in batch {
                    match embedder.embed_one(&node.text).await {
                        Ok(vector) => embedded.push((node, vector)),
                        Err(err) => {
                            error!("Nodo {} omitido: {err}", node.id);
                            skipped += 1;
                            last_error = Some(err);
                        }
                    }
                }
            }
        }
        info!("[{done}/{total}] nodos procesados");
    }

    (embedded, skipped, last_error)
}

/// Carga el índice persistido si existe y no está vacío; si no, lo construye
/// a partir de `source_dir` y lo persiste. Nunca reconstruye un índice válido.
pub async fn build_or_load(
    embedder: &Embedder,
    source_dir: &Path,
    persist_dir: &Path,
    collection: &str,
) -> Result<(VectorIndex, IngestionReport), IngestError> {
    let mut report = IngestionReport::default();

    let existing = VectorIndex::load(persist_dir, collection)?;
    let index = match existing {
        Some(index) if index.vector_count() > 0 => {
            info!("Cargando índice existente '{collection}' ({} vectores)...", index.vector_count());
            embedder.lock_dimension(index.dimension())?;
            report.outcome = IndexOutcome::Loaded;
            index
        }
        _ => {
            let scan = scan_sources(source_dir);
            report.files_scanned = scan.files_scanned;
            report.files_ingested = scan.files_ingested;
            report.files_rejected = scan.violations.len();
            report.violations = scan.violations;

            let nodes = build_nodes(&scan.entries);
            if nodes.is_empty() {
                error!("No se creó ningún nodo a partir de {}", source_dir.display());
                return Err(IngestError::NoNodes(source_dir.display().to_string()));
            }
            report.nodes_built = nodes.len();

            info!("Creando índice nuevo ({} nodos) con {}...", nodes.len(), embedder.model_name());
            let (embedded, skipped, last_error) = embed_nodes(embedder, nodes).await;
            report.nodes_skipped = skipped;
            report.nodes_embedded = embedded.len();
            if embedded.is_empty() {
                return Err(IngestError::Embedding(last_error.unwrap_or_else(|| {
                    AdapterError::invalid_response(embedder.model_name(), "ningún nodo pudo embeberse")
                })));
            }

            let index = VectorIndex::build(collection, embedded)?;
            let path = index.persist(persist_dir)?;
            info!("Índice persistido en {}", path.display());
            report.outcome = IndexOutcome::Built;
            index
        }
    };

    report.documents = index.doc_count();
    info!("DocStore registros: {}", report.documents);
    match index.sample_id() {
        Some(sample) => info!("Id de nodo de ejemplo: {sample}"),
        None => warn!("El docstore está vacío: el índice no devolverá resultados"),
    }
    info!("{report}");

    Ok((index, report))
}

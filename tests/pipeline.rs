//! Pipeline completo (ingesta, índice persistido y consulta) con adaptadores
//! simulados y directorios temporales.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use labor_law_rag::config::RagParams;
use labor_law_rag::embedding::{Embedder, EmbeddingModel};
use labor_law_rag::error::AdapterError;
use labor_law_rag::ingest::{build_or_load, IndexOutcome};
use labor_law_rag::llm::{ChatMessage, GenerationOptions, LanguageModel};
use labor_law_rag::models::AnswerStatus;
use labor_law_rag::rag::{RagFlow, NO_RELEVANT_TEXT};
use labor_law_rag::rerank::{RerankHit, RerankModel, Reranker};
use labor_law_rag::vector_store::VectorIndex;
use tempfile::TempDir;
use tokio_test::assert_ok;

const TOPICS: [&str; 3] = ["劳动者", "工资", "工伤"];

/// Un eje por tema más un sesgo constante.
#[derive(Default)]
struct TopicEmbedding {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingModel for TopicEmbedding {
    fn model_name(&self) -> &str {
        "topic-embedding"
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f64>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vector: Vec<f64> = TOPICS
            .iter()
            .map(|t| if text.contains(t) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        Ok(vector)
    }
}

/// Alta relevancia si pregunta y documento comparten tema.
struct TopicRerank;

#[async_trait]
impl RerankModel for TopicRerank {
    fn model_name(&self) -> &str {
        "topic-rerank"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<RerankHit>, AdapterError> {
        Ok(documents
            .iter()
            .enumerate()
            .rev()
            .map(|(index, doc)| {
                let shared = TOPICS.iter().any(|t| query.contains(t) && doc.contains(t));
                RerankHit {
                    index,
                    relevance_score: if shared { 0.9 } else { 0.1 },
                }
            })
            .collect())
    }
}

struct DownRerank;

#[async_trait]
impl RerankModel for DownRerank {
    fn model_name(&self) -> &str {
        "down-rerank"
    }

    async fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<RerankHit>, AdapterError> {
        Err(AdapterError::unavailable("down-rerank", "connection refused"))
    }
}

#[derive(Default)]
struct RecordingLlm {
    prompts: Mutex<Vec<String>>,
}

impl RecordingLlm {
    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for RecordingLlm {
    fn model_name(&self) -> &str {
        "recording-llm"
    }

    async fn chat(&self, messages: &[ChatMessage], _options: &GenerationOptions) -> Result<String, AdapterError> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);
        Ok("<think>先找到相关条文。</think>根据《劳动法》第一条，劳动者的合法权益受法律保护。".into())
    }
}

fn write_laws(dir: &Path) {
    fs::write(
        dir.join("laws.json"),
        r#"[{"劳动法 第一条": "为了保护劳动者的合法权益，调整劳动关系，制定本法。"}]"#,
    )
    .unwrap();
}

fn write_more_laws(dir: &Path) {
    fs::write(
        dir.join("wages.json"),
        r#"[{"劳动法 第五十条": "工资应当以货币形式按月支付给劳动者本人。", "工伤保险条例 第十四条": "职工在工作时间和工作场所内，因工作原因受到事故伤害的，应当认定为工伤。"}]"#,
    )
    .unwrap();
}

struct Harness {
    data: TempDir,
    storage: TempDir,
    embedding: Arc<TopicEmbedding>,
    llm: Arc<RecordingLlm>,
}

impl Harness {
    fn new() -> Self {
        let data = TempDir::new().unwrap();
        write_laws(data.path());
        Self {
            data,
            storage: TempDir::new().unwrap(),
            embedding: Arc::new(TopicEmbedding::default()),
            llm: Arc::new(RecordingLlm::default()),
        }
    }

    fn embedder(&self) -> Embedder {
        Embedder::new(self.embedding.clone(), 10)
    }

    async fn index(&self) -> VectorIndex {
        let (index, _) = assert_ok!(build_or_load(&self.embedder(), self.data.path(), self.storage.path(), "laws").await);
        index
    }

    async fn flow_with(&self, rerank: Arc<dyn RerankModel>) -> RagFlow {
        self.flow_with_params(rerank, RagParams::default()).await
    }

    async fn flow_with_params(&self, rerank: Arc<dyn RerankModel>, params: RagParams) -> RagFlow {
        RagFlow::new(
            self.embedder(),
            Reranker::new(rerank),
            self.llm.clone(),
            self.index().await,
            params,
        )
    }
}

#[tokio::test]
async fn single_article_is_answered_with_its_citation() {
    let harness = Harness::new();
    let flow = harness.flow_with(Arc::new(TopicRerank)).await;
    assert_eq!(flow.index().doc_count(), 1);

    let answer = flow.consult("劳动者权益如何保护？").await;
    assert_eq!(answer.status, AnswerStatus::Answered);
    assert!(!answer.reply.is_empty());
    assert!(!answer.reply.contains("<think>"));
    assert_eq!(answer.reasoning, vec!["先找到相关条文。"]);

    let citations = answer.citation_records();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].source_file, "laws.json");
    assert_eq!(citations[0].law_name, "劳动法");
    assert_eq!(citations[0].article, "第一条");
    assert_eq!(citations[0].score, 0.9);

    let prompts = harness.llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("为了保护劳动者的合法权益"));
}

#[tokio::test]
async fn irrelevant_question_returns_fixed_message_without_generation() {
    let harness = Harness::new();
    let flow = harness.flow_with(Arc::new(TopicRerank)).await;

    let answer = flow.answer("猪八戒娶媳妇").await;
    assert_eq!(answer.status, AnswerStatus::NoRelevantText);
    assert_eq!(answer.reply, NO_RELEVANT_TEXT);
    assert!(answer.citations.is_empty());
    assert_eq!(harness.llm.calls(), 0);
}

#[tokio::test]
async fn only_articles_above_the_threshold_are_cited() {
    let harness = Harness::new();
    write_more_laws(harness.data.path());
    let flow = harness.flow_with(Arc::new(TopicRerank)).await;
    assert_eq!(flow.index().doc_count(), 3);

    let answer = flow.consult("公司拖欠工资怎么办？").await;
    assert_eq!(answer.status, AnswerStatus::Answered);
    let titles: Vec<_> = answer
        .citations
        .iter()
        .map(|c| c.node.metadata.full_title.as_str())
        .collect();
    assert_eq!(titles, vec!["劳动法 第五十条"]);
    assert!(answer.citations.iter().all(|c| c.score > 0.3));
}

#[tokio::test]
async fn rerank_outage_falls_back_to_retrieval_order() {
    for hybrid_alpha in [0.5, 0.2] {
        let harness = Harness::new();
        write_more_laws(harness.data.path());
        let params = RagParams { hybrid_alpha, ..RagParams::default() };
        let flow = harness.flow_with_params(Arc::new(DownRerank), params).await;
        let question = "劳动者的工资如何支付？";

        let retrieved: Vec<String> = assert_ok!(flow.retrieve(question).await)
            .into_iter()
            .take(3)
            .map(|n| n.node.id)
            .collect();
        assert_eq!(retrieved.len(), 3);

        let answer = flow.consult(question).await;
        assert_eq!(answer.status, AnswerStatus::Answered, "alpha {hybrid_alpha}");
        let cited: Vec<String> = answer.citations.iter().map(|c| c.node.id.clone()).collect();
        assert_eq!(cited, retrieved, "alpha {hybrid_alpha}");
        assert_eq!(harness.llm.calls(), 1);

        let prompts = harness.llm.prompts.lock().unwrap();
        for title in ["劳动法 第一条", "劳动法 第五十条", "工伤保险条例 第十四条"] {
            assert!(prompts[0].contains(title), "{title} no llegó a la síntesis");
        }
    }
}

#[tokio::test]
async fn persisted_index_is_reloaded_without_embedding() {
    let harness = Harness::new();
    let first = harness.index().await;
    let embedded = harness.embedding.calls.load(Ordering::SeqCst);
    assert_eq!(embedded, 1);
    assert!(VectorIndex::snapshot_path(harness.storage.path(), "laws").exists());

    let (second, report) = assert_ok!(
        build_or_load(&harness.embedder(), harness.data.path(), harness.storage.path(), "laws").await
    );
    assert_eq!(report.outcome, IndexOutcome::Loaded);
    assert_eq!(harness.embedding.calls.load(Ordering::SeqCst), embedded);
    assert_eq!(second.stats(), first.stats());
    assert!(second.get("laws.json::劳动法 第一条").is_some());
}

#[tokio::test]
async fn rebuilding_from_scratch_yields_the_same_ids() {
    let first = Harness::new();
    let second = Harness::new();
    write_more_laws(first.data.path());
    write_more_laws(second.data.path());

    let a = first.index().await;
    let b = second.index().await;
    let ids = |index: &VectorIndex| {
        let stats = index.stats();
        (stats.documents, ["laws.json::劳动法 第一条", "wages.json::劳动法 第五十条", "wages.json::工伤保险条例 第十四条"]
            .iter()
            .all(|id| index.get(id).is_some()))
    };
    assert_eq!(ids(&a), (3, true));
    assert_eq!(ids(&b), (3, true));
}

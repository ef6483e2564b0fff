//! End-to-end tests of the engine against a real SQLite file, the offline
//! hash embedder, and scripted generation backends.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use finance_rag::backend::{BackendRegistry, OllamaBackend};
use finance_rag::config::{self, Config, LocalBackendConfig};
use finance_rag::core::backend::{
    BackendStatus, Configuration, GenerationBackend, RawModelOutput, Reachability, HOSTED,
};
use finance_rag::core::embedding::HashEmbedder;
use finance_rag::core::models::ResponseStatus;
use finance_rag::core::prompt::PromptPassage;
use finance_rag::core::{BackendError, BackendErrorKind, RagError};
use finance_rag::engine::RagEngine;
use finance_rag::ingest::Upload;
use finance_rag::sqlite_index::SqliteIndex;
use finance_rag::{db, migrate};

/// Hosted stand-in that cites whatever passages it was given.
#[derive(Default)]
struct RecordingBackend {
    calls: AtomicUsize,
    last_labels: Mutex<Vec<String>>,
}

#[async_trait]
impl GenerationBackend for RecordingBackend {
    fn name(&self) -> &str {
        HOSTED
    }
    fn model(&self) -> &str {
        "recording"
    }
    async fn generate(
        &self,
        _instructions: &str,
        context: &[PromptPassage],
    ) -> Result<RawModelOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let labels: Vec<String> = context.iter().map(|p| p.label.clone()).collect();
        *self.last_labels.lock().unwrap() = labels.clone();
        let body = serde_json::json!({
            "answer": format!("Based on {} the APR is 19.9%.", labels[0]),
            "key_points": ["APR is 19.9%"],
            "next_steps": [],
            "cited_passages": [labels[0].clone(), "P99"],
        });
        Ok(RawModelOutput {
            text: body.to_string(),
            model: "recording".to_string(),
        })
    }
    async fn status(&self) -> BackendStatus {
        BackendStatus {
            backend: HOSTED.to_string(),
            model: "recording".to_string(),
            configuration: Configuration::Configured,
            reachability: Reachability::Reachable,
            detail: None,
        }
    }
}

fn test_config(root: &Path, extra: &str) -> Config {
    let toml = format!(
        r#"[db]
path = "{}/data/finrag.sqlite"

[chunking]
chunk_size = 120
chunk_overlap = 20

[embedding]
provider = "hash"
dims = 64
batch_size = 4

[backends.local]
url = "http://127.0.0.1:1"
timeout_secs = 2
{}
"#,
        root.display(),
        extra
    );
    config::parse_config(&toml).unwrap()
}

async fn open_engine(
    cfg: Config,
    dims: usize,
    hosted: Option<Arc<RecordingBackend>>,
    with_local: bool,
) -> Result<RagEngine, RagError> {
    let pool = db::connect_path(&cfg.db.path).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let index = Arc::new(SqliteIndex::new(pool));

    let mut backends = BackendRegistry::new();
    if let Some(h) = hosted {
        backends.register(h);
    }
    if with_local {
        let local = OllamaBackend::from_config(&LocalBackendConfig {
            url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();
        backends.register(Arc::new(local));
    }
    RagEngine::with_components(cfg, index, Arc::new(HashEmbedder::new(dims)), backends).await
}

fn finance_uploads() -> Vec<Upload> {
    vec![
        Upload::text(
            "card_terms.txt",
            "Credit card terms. The purchase APR is 19.9% variable. Cash advances carry an APR of 24.9%. \
             The annual fee is $95 and is waived in the first year. Late payment fee is up to $40.",
        ),
        Upload::text(
            "budget.md",
            "# Monthly budget\nRent 1,450. Groceries 520. Utilities 180. Savings transfer 600. \
             Emergency fund target is six months of expenses.",
        ),
        Upload::bytes("scan.pdf", b"%PDF-1.7 binary".to_vec()),
        Upload::text(
            "taxes.txt",
            "Estimated quarterly tax payments are due in April, June, September and January.",
        ),
    ]
}

#[tokio::test]
async fn test_partial_batch_then_dual_backend_answer() {
    let tmp = TempDir::new().unwrap();
    let hosted = Arc::new(RecordingBackend::default());
    let engine = open_engine(test_config(tmp.path(), ""), 64, Some(hosted.clone()), true)
        .await
        .unwrap();

    let report = engine.ingest(finance_uploads()).await.unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].filename, "scan.pdf");
    assert!(report.total_chunks >= 3);

    let response = engine
        .ask("What is the purchase APR on the credit card?", Some(4), true, true)
        .await
        .unwrap();

    assert_eq!(response.status, ResponseStatus::Partial);
    assert_eq!(response.produced_by, vec![HOSTED.to_string()]);
    assert!(response.answer.contains("19.9%"));
    assert_eq!(response.backends.len(), 2);
    let local = response.backends[1].error().unwrap();
    assert_eq!(local.kind, BackendErrorKind::Unavailable);

    // Unknown label P99 is dropped; the cited passage is one that was retrieved.
    assert_eq!(response.citations.len(), 1);
    let retrieved = engine.search("What is the purchase APR on the credit card?", Some(4)).await.unwrap();
    assert!(retrieved.iter().any(|p| p.chunk.id == response.citations[0].chunk.id));
    assert!(!response.next_steps.is_empty());
}

#[tokio::test]
async fn test_empty_index_returns_no_context_without_calling_backends() {
    let tmp = TempDir::new().unwrap();
    let hosted = Arc::new(RecordingBackend::default());
    let engine = open_engine(test_config(tmp.path(), ""), 64, Some(hosted.clone()), false)
        .await
        .unwrap();

    let response = engine.ask("How much is rent?", None, true, false).await.unwrap();
    assert_eq!(response.status, ResponseStatus::NoContext);
    assert!(response.answer.starts_with("No relevant documents were found"));
    assert_eq!(hosted.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_index_survives_reopen_and_rejects_other_embedding_model() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(tmp.path(), "");

    let engine = open_engine(cfg.clone(), 64, None, false).await.unwrap();
    engine.ingest(finance_uploads()).await.unwrap();
    let before = engine.status().await.unwrap();
    let first = engine.search("annual fee", Some(3)).await.unwrap();
    engine.close().await;

    let reopened = open_engine(cfg.clone(), 64, None, false).await.unwrap();
    let after = reopened.status().await.unwrap();
    assert_eq!(after.index_chunk_count, before.index_chunk_count);
    assert_eq!(after.index_document_count, 3);
    assert_eq!(after.embedding_model.as_deref(), Some("hash-64"));
    let second = reopened.search("annual fee", Some(3)).await.unwrap();
    let ids = |ps: &[finance_rag::core::models::RetrievedPassage]| {
        ps.iter().map(|p| p.chunk.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    reopened.close().await;

    let err = open_engine(cfg, 32, None, false).await.err().unwrap();
    assert!(matches!(err, RagError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_reingest_with_new_chunking_replaces_stored_chunks() {
    let tmp = TempDir::new().unwrap();
    let text = "Quarterly revenue grew and costs fell. ".repeat(20);

    let mut fine = test_config(tmp.path(), "");
    fine.chunking.chunk_size = 50;
    fine.chunking.chunk_overlap = 10;
    let engine = open_engine(fine.clone(), 64, None, false).await.unwrap();
    let first = engine.ingest(vec![Upload::text("q3.txt", text.clone())]).await.unwrap();
    assert_eq!(first.total_chunks, 20);
    engine.close().await;

    let mut coarse = fine;
    coarse.chunking.chunk_size = 400;
    coarse.chunking.chunk_overlap = 50;
    let engine = open_engine(coarse, 64, None, false).await.unwrap();
    let second = engine.ingest(vec![Upload::text("q3.txt", text)]).await.unwrap();
    assert_eq!(second.total_chunks, 3);

    let status = engine.status().await.unwrap();
    assert_eq!(status.index_chunk_count, 3);
    assert_eq!(status.index_document_count, 1);
    let passages = engine.search("quarterly revenue", Some(10)).await.unwrap();
    assert_eq!(passages.len(), 3);
    assert!(passages.iter().all(|p| p.chunk.text.chars().count() <= 400));
}

#[tokio::test]
async fn test_prompt_budget_limits_passages_sent() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(tmp.path(), "\n[synthesis.prompt]\nmax_passages = 2\n");
    let hosted = Arc::new(RecordingBackend::default());
    let engine = open_engine(cfg, 64, Some(hosted.clone()), false).await.unwrap();
    engine.ingest(finance_uploads()).await.unwrap();

    let response = engine.ask("APR fee budget taxes", Some(5), true, false).await.unwrap();
    assert_eq!(response.status, ResponseStatus::Complete);
    let sent = hosted.last_labels.lock().unwrap().clone();
    assert_eq!(sent, vec!["P1".to_string(), "P2".to_string()]);
    assert!(response.citations.iter().all(|c| sent.contains(&c.label)));
}

#[tokio::test]
async fn test_neither_backend_requested_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(test_config(tmp.path(), ""), 64, None, false)
        .await
        .unwrap();
    let err = engine.ask("anything", None, false, false).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_ingest_paths_reads_directory() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(docs.join("2024")).unwrap();
    std::fs::write(docs.join("rates.txt"), "Savings account APY is 4.35%.").unwrap();
    std::fs::write(docs.join("2024/q1.md"), "Q1 dividends totaled $312.").unwrap();
    std::fs::write(docs.join("photo.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

    let engine = open_engine(test_config(tmp.path(), ""), 64, None, false)
        .await
        .unwrap();
    let report = engine.ingest_paths(&[docs]).await.unwrap();
    assert_eq!(report.processed, 2);
    assert!(report.failed.is_empty());

    let documents = engine.list_documents().await.unwrap();
    let mut sources: Vec<String> = documents.into_iter().map(|d| d.source).collect();
    sources.sort();
    assert_eq!(sources, vec!["2024/q1.md".to_string(), "rates.txt".to_string()]);
    assert_eq!(engine.collections().await.unwrap(), vec!["finance_documents".to_string()]);
}

#[tokio::test]
async fn test_analyze_files_reports_each_file() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    let statement = "Brokerage statement. Dividends $312. Realized gains $1,240.";
    std::fs::write(docs.join("statement.txt"), statement).unwrap();
    std::fs::write(docs.join("notes.md"), "# Goals\nMax out the IRA this year.").unwrap();
    std::fs::write(docs.join("scan.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();

    let hosted = Arc::new(RecordingBackend::default());
    let engine = open_engine(test_config(tmp.path(), ""), 64, Some(hosted.clone()), false)
        .await
        .unwrap();
    let batch = engine
        .analyze_files(
            &[
                docs.join("statement.txt"),
                docs.join("scan.png"),
                docs.join("notes.md"),
            ],
            true,
            false,
        )
        .await
        .unwrap();

    assert_eq!(batch.files_analyzed, 2);
    assert_eq!(hosted.calls.load(Ordering::SeqCst), 2);
    let first = &batch.reports[0];
    assert_eq!(first.filename, "statement.txt");
    assert_eq!(first.file_type, "txt");
    assert_eq!(first.size_bytes, statement.len() as u64);
    assert_eq!(first.preview, statement);
    assert!(first.outcomes[0].analysis.is_some());
    assert_eq!(batch.reports[1].file_type, "md");
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].filename, "scan.png");
}

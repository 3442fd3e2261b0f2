//! Integration tests for the ingestion pipeline and vector index.

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

use docuchat::chunk::chunk_text;
use docuchat::config::{ChunkingConfig, Config, DbConfig};
use docuchat::db;
use docuchat::embedding::Embedder;
use docuchat::error::{Result as ServiceResult, ServiceError};
use docuchat::index::VectorIndex;
use docuchat::ingest::process_document;
use docuchat::migrate;
use docuchat::models::{AssetStatus, Chunk};
use docuchat::registry::AssetRegistry;
use docuchat::retrieve::Retriever;
use std::sync::Arc;

/// Deterministic embedder: a byte histogram, so similar texts get similar
/// vectors and tests never call the network.
struct StubEmbedder;

fn stub_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; 8];
    for b in text.bytes() {
        v[(b % 8) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| stub_vector(t)).collect())
    }
}

/// Embedder that always fails, for the Failed-asset path.
struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, _texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        Err(ServiceError::EmbeddingService(
            "stub provider outage".to_string(),
        ))
    }
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: dir.path().join("data").join("docuchat.sqlite"),
        },
        chunking: ChunkingConfig {
            chunk_size: 500,
            chunk_overlap: 50,
        },
        retrieval: Default::default(),
        embedding: Default::default(),
        generation: Default::default(),
        server: Default::default(),
    }
}

async fn setup() -> (TempDir, Config, AssetRegistry, VectorIndex) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config.db.path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (
        tmp,
        config,
        AssetRegistry::new(pool.clone()),
        VectorIndex::new(pool),
    )
}

fn write_three_page_text(dir: &TempDir) -> PathBuf {
    let page = "The quick brown fox jumps over the lazy dog. ".repeat(30);
    let text = format!("{}\n\n{}\n\n{}", page, page, page);
    let path = dir.path().join("report.txt");
    std::fs::write(&path, &text).unwrap();
    path
}

/// Minimal docx (ZIP) containing `word/document.xml` with the phrase.
fn write_docx(dir: &TempDir, phrase: &str) -> PathBuf {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    let path = dir.path().join("notes.docx");
    std::fs::write(&path, &buf).unwrap();
    path
}

#[tokio::test]
async fn text_file_ingests_and_matches_chunker_count() {
    let (tmp, config, registry, index) = setup().await;
    let path = write_three_page_text(&tmp);
    let text = std::fs::read_to_string(&path).unwrap();

    let outcome = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap();

    let expected = chunk_text(&text, &config.chunking).len() as i64;
    assert_eq!(outcome.status, AssetStatus::Indexed);
    assert_eq!(outcome.chunk_count, expected);

    let asset = registry.get(&outcome.asset_id).await.unwrap();
    assert_eq!(asset.status, AssetStatus::Indexed);
    assert_eq!(asset.chunk_count, expected);
    assert_eq!(index.chunk_count(&outcome.asset_id).await.unwrap(), expected);
}

#[tokio::test]
async fn reingesting_the_same_document_is_deterministic() {
    let (tmp, config, registry, index) = setup().await;
    let path = write_three_page_text(&tmp);

    let first = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap();
    let second = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap();

    assert_ne!(first.asset_id, second.asset_id);
    assert_eq!(first.chunk_count, second.chunk_count);
}

#[tokio::test]
async fn missing_file_creates_no_asset() {
    let (tmp, config, registry, index) = setup().await;
    let path = tmp.path().join("nope.txt");

    let err = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "file_not_found");
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_format_creates_no_asset() {
    let (tmp, config, registry, index) = setup().await;
    let path = tmp.path().join("slides.key");
    std::fs::write(&path, b"whatever").unwrap();

    let err = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "unsupported_format");
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn embedding_failure_marks_asset_failed_with_no_partial_chunks() {
    let (tmp, config, registry, index) = setup().await;
    let path = write_three_page_text(&tmp);

    let err = process_document(&config, &registry, &index, &FailingEmbedder, &path)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "embedding_service_error");

    let assets = registry.list().await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].status, AssetStatus::Failed);
    assert!(assets[0].error.as_deref().unwrap().contains("outage"));
    // The failed asset left nothing queryable behind.
    assert_eq!(index.chunk_count(&assets[0].id).await.unwrap(), 0);
}

#[tokio::test]
async fn docx_ingests_with_extracted_text() {
    let (tmp, config, registry, index) = setup().await;
    let path = write_docx(&tmp, "office test phrase");

    let outcome = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap();
    assert_eq!(outcome.status, AssetStatus::Indexed);
    assert_eq!(outcome.chunk_count, 1);

    let results = index
        .search(&outcome.asset_id, &stub_vector("office test phrase"), 4)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].text.contains("office test phrase"));
}

#[tokio::test]
async fn corrupt_pdf_creates_no_asset() {
    let (tmp, config, registry, index) = setup().await;
    let path = tmp.path().join("bad.pdf");
    std::fs::write(&path, b"not a valid pdf").unwrap();

    let err = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "file_unreadable");
    assert!(registry.list().await.unwrap().is_empty());
}

// ============ Vector index contract ============

fn chunk_row(asset_id: &str, idx: i64, text: &str) -> Chunk {
    Chunk {
        id: format!("{}_{}", asset_id, idx),
        asset_id: asset_id.to_string(),
        chunk_index: idx,
        text: text.to_string(),
        start_offset: 0,
        end_offset: text.len() as i64,
        page: 1,
    }
}

#[tokio::test]
async fn search_returns_at_most_k_in_descending_score_order() {
    let (_tmp, _config, _registry, index) = setup().await;

    let chunks: Vec<Chunk> = (0..6)
        .map(|i| chunk_row("asset-a", i, &format!("chunk number {}", i)))
        .collect();
    // Vectors with decreasing alignment to the query [1, 0].
    let vectors: Vec<Vec<f32>> = (0..6).map(|i| vec![1.0, i as f32 * 0.5]).collect();
    index.upsert(&chunks, &vectors).await.unwrap();

    let results = index.search("asset-a", &[1.0, 0.0], 4).await.unwrap();
    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    let mut ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 4, "no duplicate chunk ids");
    assert_eq!(results[0].chunk_id, "asset-a_0");
}

#[tokio::test]
async fn equal_scores_tie_break_by_chunk_id() {
    let (_tmp, _config, _registry, index) = setup().await;

    let chunks = vec![
        chunk_row("asset-a", 2, "c"),
        chunk_row("asset-a", 0, "a"),
        chunk_row("asset-a", 1, "b"),
    ];
    let same = vec![vec![1.0, 0.0]; 3];
    index.upsert(&chunks, &same).await.unwrap();

    let results = index.search("asset-a", &[1.0, 0.0], 3).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["asset-a_0", "asset-a_1", "asset-a_2"]);
}

#[tokio::test]
async fn partitions_do_not_leak_across_assets() {
    let (_tmp, _config, _registry, index) = setup().await;

    index
        .upsert(&[chunk_row("asset-a", 0, "alpha")], &[vec![1.0, 0.0]])
        .await
        .unwrap();
    index
        .upsert(&[chunk_row("asset-b", 0, "beta")], &[vec![1.0, 0.0]])
        .await
        .unwrap();

    let results = index.search("asset-a", &[1.0, 0.0], 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "alpha");
}

#[tokio::test]
async fn upsert_is_idempotent_by_chunk_id() {
    let (_tmp, _config, _registry, index) = setup().await;

    let chunk = chunk_row("asset-a", 0, "original");
    index.upsert(&[chunk.clone()], &[vec![1.0, 0.0]]).await.unwrap();

    let mut updated = chunk.clone();
    updated.text = "rewritten".to_string();
    index.upsert(&[updated], &[vec![0.0, 1.0]]).await.unwrap();

    assert_eq!(index.chunk_count("asset-a").await.unwrap(), 1);
    let results = index.search("asset-a", &[0.0, 1.0], 1).await.unwrap();
    assert_eq!(results[0].text, "rewritten");
}

#[tokio::test]
async fn delete_asset_removes_partition_and_tolerates_unknown_ids() {
    let (_tmp, _config, _registry, index) = setup().await;

    index
        .upsert(&[chunk_row("asset-a", 0, "alpha")], &[vec![1.0, 0.0]])
        .await
        .unwrap();
    index.delete_asset("asset-a").await.unwrap();
    assert_eq!(index.chunk_count("asset-a").await.unwrap(), 0);

    // Unknown asset: no-op, not an error.
    index.delete_asset("never-existed").await.unwrap();
}

// ============ Registry gate ============

#[tokio::test]
async fn pending_asset_is_not_ready_and_unknown_is_not_found() {
    let (_tmp, _config, registry, index) = setup().await;
    let retriever = Retriever::new(registry.clone(), index, Arc::new(StubEmbedder), 4);

    let pending_id = registry.create("somewhere.txt").await.unwrap();
    let err = retriever.retrieve(&pending_id, "anything").await.unwrap_err();
    assert_eq!(err.kind(), "asset_not_ready");

    let err = retriever.retrieve("no-such-asset", "anything").await.unwrap_err();
    assert_eq!(err.kind(), "asset_not_found");
}

#[tokio::test]
async fn retrieval_finds_matching_chunk_on_indexed_asset() {
    let (tmp, config, registry, index) = setup().await;
    let path = tmp.path().join("facts.txt");
    std::fs::write(
        &path,
        "The capital of France is Paris.\n\nRust has a borrow checker.",
    )
    .unwrap();

    let outcome = process_document(&config, &registry, &index, &StubEmbedder, &path)
        .await
        .unwrap();

    let retriever = Retriever::new(registry, index, Arc::new(StubEmbedder), 4);
    let results = retriever
        .retrieve(&outcome.asset_id, "capital of France")
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 4);
}

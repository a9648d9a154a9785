/// Integration tests for index artifacts, corpus loading and generation swaps
mod common;

use common::{build_generation, chunk, directive_corpus, embedder, searcher, test_config};
use regsearch::artifact::{artifact_path, read_header, ARTIFACT_FORMAT_VERSION};
use regsearch::config::Config;
use regsearch::corpus::Corpus;
use regsearch::error::RegsearchError;
use regsearch::retrieval::{IndexBuilder, RetrievalMethod, SearchRequest};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_persisted_artifacts_reload_with_same_rankings() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let built = build_generation(&config, directive_corpus()).await;

    let builder = IndexBuilder::from_config(&config, &config.artifacts.dir);
    let loaded = builder
        .load(Arc::new(directive_corpus()), Some(embedder()))
        .unwrap();
    assert_eq!(loaded.fingerprint(), built.fingerprint());

    let request = SearchRequest::new("plazo de rendición de cuentas");
    let fresh = searcher(&config, built).search(&request).await.unwrap();
    let reloaded = searcher(&config, loaded).search(&request).await.unwrap();

    assert_eq!(
        serde_json::to_string(&fresh.results).unwrap(),
        serde_json::to_string(&reloaded.results).unwrap()
    );
}

#[tokio::test]
async fn test_headers_describe_each_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let generation = build_generation(&config, directive_corpus()).await;

    for method in RetrievalMethod::ALL {
        let path = artifact_path(&config.artifacts.dir, method);
        assert!(path.exists(), "missing {}", path.display());

        let header = read_header(&path, method).unwrap();
        assert_eq!(header.format_version, ARTIFACT_FORMAT_VERSION);
        assert_eq!(header.method, method);
        assert_eq!(&header.corpus, generation.fingerprint());
        assert_eq!(header.corpus.chunk_count, 7);
    }

    let dense = read_header(
        &artifact_path(&config.artifacts.dir, RetrievalMethod::Dense),
        RetrievalMethod::Dense,
    )
    .unwrap();
    assert_eq!(dense.parameters["model"], "hashing-test");
    assert_eq!(dense.parameters["dimension"], common::HASHING_DIMENSION);
}

#[tokio::test]
async fn test_changed_corpus_refuses_stale_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    build_generation(&config, directive_corpus()).await;

    let mut chunks = directive_corpus().chunks().to_vec();
    chunks[1].text = "Artículo 5. El monto máximo es de S/ 380.00 soles por día.".to_string();
    let edited = Corpus::new(chunks).unwrap();

    let builder = IndexBuilder::from_config(&config, &config.artifacts.dir);
    let err = builder.load(Arc::new(edited), Some(embedder())).unwrap_err();

    assert!(matches!(err, RegsearchError::FingerprintMismatch { .. }));
    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn test_missing_artifact_is_configuration_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    build_generation(&config, directive_corpus()).await;

    std::fs::remove_file(artifact_path(&config.artifacts.dir, RetrievalMethod::LexicalProb))
        .unwrap();

    let builder = IndexBuilder::from_config(&config, &config.artifacts.dir);
    let err = builder
        .load(Arc::new(directive_corpus()), Some(embedder()))
        .unwrap_err();

    assert!(matches!(err, RegsearchError::ArtifactNotFound { .. }));
    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn test_analyzer_change_requires_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    build_generation(&config, directive_corpus()).await;

    let mut changed = config.clone();
    changed.analysis.ngram_max = 1;
    let builder = IndexBuilder::from_config(&changed, &changed.artifacts.dir);
    let err = builder
        .load(Arc::new(directive_corpus()), Some(embedder()))
        .unwrap_err();

    assert!(err.is_configuration_error());
}

#[tokio::test]
async fn test_publish_swaps_generation_for_new_queries_only() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let searcher = searcher(&config, build_generation(&config, directive_corpus()).await);
    let registry = Arc::clone(searcher.registry());

    let pinned = registry.current().await;
    assert_eq!(registry.version(), 1);

    let second_dir = TempDir::new().unwrap();
    let second_config = test_config(second_dir.path());
    let replacement = Corpus::new(vec![chunk(
        "caja-001",
        "El fondo de caja chica atiende gastos menores de hasta S/ 150.00 soles.",
        "directiva_caja_chica.pdf",
        2,
    )])
    .unwrap();
    let version = registry
        .publish(build_generation(&second_config, replacement).await)
        .await;
    assert_eq!(version, 2);

    // The snapshot taken before the swap still sees the old corpus
    assert_eq!(pinned.corpus().len(), 7);
    assert!(pinned.corpus().get("dir-002").is_some());

    let response = searcher
        .search(&SearchRequest::new("caja chica gastos menores"))
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.chunk_id == "caja-001"));
}

#[test]
fn test_corpus_loads_from_jsonl() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("chunks.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"id": "c1", "content": "Viáticos por comisión de servicio", "metadata": {"source": "a.pdf", "page": 2}}"#,
            "\n\n",
            r#"{"id": "c2", "text": "Pasajes en clase económica"}"#,
            "\n",
        ),
    )
    .unwrap();

    let corpus = Corpus::load(&path).unwrap();
    assert_eq!(corpus.len(), 2);
    assert_eq!(corpus.get("c1").unwrap().metadata.page, Some(2));
    assert_eq!(corpus.get("c2").unwrap().metadata.source, "");

    // Same chunks, same fingerprint
    assert_eq!(Corpus::load(&path).unwrap().fingerprint(), corpus.fingerprint());
}

#[test]
fn test_config_file_with_bad_weights_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[_meta]
schema_version = "1.0.0"

[corpus]
path = "/tmp/chunks.jsonl"

[artifacts]
dir = "/tmp/indexes"

[fusion.weights]
lexical_tf = 0.5
lexical_prob = 0.4
dense = 0.3
"#,
    )
    .unwrap();

    match Config::load(&path) {
        Err(RegsearchError::ConfigValidation { errors }) => {
            assert!(errors.iter().any(|e| e.path == "fusion.weights"));
        }
        other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
    }
}

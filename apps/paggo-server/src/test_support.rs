//! Shared fixtures for HTTP tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::ask::AskService;
use crate::config::Config;
use crate::db::create_memory_pool;
use crate::export::ExportService;
use crate::ingest::{IngestConfig, IngestionService};
use crate::llm::{LlmClient, LlmError, LlmMessage};
use crate::ocr::{
    ExtractionConfig, ExtractionError, ExtractionOrchestrator, MupdfTextLayer, OcrEngine,
    OcrEngineKind, PdftoppmRasterizer,
};
use crate::state::AppState;
use crate::storage::LocalStorage;

pub enum TestEngine {
    /// Every recognition returns this text
    Fixed(&'static str),
    /// Every recognition fails
    Failing,
}

#[async_trait]
impl OcrEngine for TestEngine {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Native
    }

    async fn recognize(&self, _image_path: &Path) -> Result<String, ExtractionError> {
        match self {
            TestEngine::Fixed(text) => Ok(text.to_string()),
            TestEngine::Failing => Err(ExtractionError::Engine("no text found".to_string())),
        }
    }
}

struct StubLlm;

#[async_trait]
impl LlmClient for StubLlm {
    async fn answer_with_context(
        &self,
        _instructions: &str,
        _messages: &[LlmMessage],
    ) -> Result<String, LlmError> {
        Ok("stub answer".to_string())
    }
}

pub struct TestContext {
    pub state: AppState,
    _dir: TempDir,
}

/// State over an in-memory database and a scratch storage root
pub async fn test_state(engine: TestEngine) -> TestContext {
    let dir = TempDir::new().unwrap();
    let pool = create_memory_pool().await.unwrap();

    let mut config = Config::default();
    config.storage.root = dir.path().join("storage");
    config.storage.temp_dir = dir.path().join("tmp");

    let storage = LocalStorage::new(&config.storage.root).unwrap();
    let orchestrator = ExtractionOrchestrator::new(
        ExtractionConfig::default(),
        Arc::new(engine),
        Arc::new(MupdfTextLayer::new(Duration::from_secs(5))),
        Arc::new(PdftoppmRasterizer::new(
            "pdftoppm",
            config.storage.temp_dir.clone(),
            Duration::from_secs(5),
        )),
    );
    let ingestion = IngestionService::new(
        pool.clone(),
        storage.clone(),
        Arc::new(orchestrator),
        IngestConfig::default(),
    );
    let ask = AskService::new(pool.clone(), Arc::new(StubLlm));
    let export = ExportService::new(pool.clone(), Duration::from_secs(5));

    TestContext {
        state: AppState::from_parts(config, pool, storage, ingestion, ask, export),
        _dir: dir,
    }
}

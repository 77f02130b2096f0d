//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::ask::AskService;
use crate::config::Config;
use crate::export::ExportService;
use crate::ingest::{IngestConfig, IngestionService};
use crate::llm::{build_client, LlmError};
use crate::ocr::{
    build_engine, ExtractionError, ExtractionOrchestrator, MupdfTextLayer, PdftoppmRasterizer,
};
use crate::storage::{LocalStorage, StorageError};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to initialize OCR engine: {0}")]
    Ocr(#[from] ExtractionError),

    #[error("Failed to initialize LLM client: {0}")]
    Llm(#[from] LlmError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    storage: LocalStorage,
    ingestion: IngestionService,
    ask: AskService,
    export: ExportService,
}

impl AppState {
    /// Wire up storage, the extraction pipeline and the LLM backend from
    /// configuration.
    pub fn new(config: Config, db: SqlitePool) -> Result<Self, StateError> {
        let storage = LocalStorage::new(&config.storage.root)?;

        let engine = build_engine(&config.ocr.engine_settings())?;
        tracing::info!(engine = ?engine.kind(), language = %config.ocr.language, "OCR engine ready");

        let orchestrator = ExtractionOrchestrator::new(
            config.ocr.extraction_config(),
            engine,
            Arc::new(MupdfTextLayer::new(config.ocr.text_layer_timeout())),
            Arc::new(PdftoppmRasterizer::new(
                config.ocr.pdftoppm_cmd.clone(),
                config.storage.temp_dir.clone(),
                config.ocr.raster_timeout(),
            )),
        );

        let ingestion = IngestionService::new(
            db.clone(),
            storage.clone(),
            Arc::new(orchestrator),
            IngestConfig {
                inline_buffer_limit: config.ingest.inline_buffer_limit,
            },
        );
        let ask = AskService::new(db.clone(), build_client(&config.llm)?);
        let export = ExportService::new(db.clone(), config.ocr.raster_timeout());

        Ok(Self::from_parts(config, db, storage, ingestion, ask, export))
    }

    /// Assemble state from prebuilt services
    pub fn from_parts(
        config: Config,
        db: SqlitePool,
        storage: LocalStorage,
        ingestion: IngestionService,
        ask: AskService,
        export: ExportService,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                storage,
                ingestion,
                ask,
                export,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.inner.storage
    }

    pub fn ingestion(&self) -> &IngestionService {
        &self.inner.ingestion
    }

    pub fn ask(&self) -> &AskService {
        &self.inner.ask
    }

    pub fn export(&self) -> &ExportService {
        &self.inner.export
    }
}

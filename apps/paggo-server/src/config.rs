//! Configuration management for Paggo Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::llm::RetryPolicy;
use crate::ocr::{ExtractionConfig, OcrEngineKind, OcrEngineSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub ocr: OcrConfig,
    pub ingest: IngestSettings,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root for uploaded files
    pub root: PathBuf,
    /// Scratch directory for rasterized pages
    pub temp_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub engine: OcrEngineKind,
    pub language: String,
    pub tesseract_cmd: String,
    pub tessdata_dir: Option<String>,
    pub pdftoppm_cmd: String,
    pub min_direct_text_chars: usize,
    pub text_batch_pages: u32,
    pub text_max_pages: u32,
    pub raster_batch_pages: u32,
    pub raster_max_pages: u32,
    pub dpi: u32,
    pub ocr_timeout_secs: u64,
    pub raster_timeout_secs: u64,
    pub text_layer_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Uploads smaller than this are handed to the extractor in memory
    pub inline_buffer_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Gemini,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown LLM provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: String,
    /// Override for the provider's API host (proxies, tests)
    pub base_url: Option<String>,
    pub max_output_tokens: u32,
    pub retry: RetryPolicy,
}

impl LlmConfig {
    pub fn default_model(provider: LlmProvider) -> &'static str {
        match provider {
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Gemini => "gemini-2.5-flash",
        }
    }
}

impl OcrConfig {
    pub fn extraction_config(&self) -> ExtractionConfig {
        ExtractionConfig {
            min_direct_text_chars: self.min_direct_text_chars,
            text_batch_pages: self.text_batch_pages,
            text_max_pages: self.text_max_pages,
            raster_batch_pages: self.raster_batch_pages,
            raster_max_pages: self.raster_max_pages,
            dpi: self.dpi,
        }
    }

    pub fn engine_settings(&self) -> OcrEngineSettings {
        OcrEngineSettings {
            kind: self.engine,
            language: self.language.clone(),
            tesseract_cmd: self.tesseract_cmd.clone(),
            tessdata_dir: self.tessdata_dir.clone(),
            timeout: Duration::from_secs(self.ocr_timeout_secs),
        }
    }

    pub fn raster_timeout(&self) -> Duration {
        Duration::from_secs(self.raster_timeout_secs)
    }

    pub fn text_layer_timeout(&self) -> Duration {
        Duration::from_secs(self.text_layer_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        let extraction = ExtractionConfig::default();
        let engine = OcrEngineSettings::default();

        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                root: PathBuf::from("./storage"),
                temp_dir: PathBuf::from("./storage/tmp"),
                max_upload_bytes: 10 * 1024 * 1024,
            },
            database: DatabaseConfig {
                url: "sqlite:./paggo.db".to_string(),
            },
            ocr: OcrConfig {
                engine: engine.kind,
                language: engine.language,
                tesseract_cmd: engine.tesseract_cmd,
                tessdata_dir: None,
                pdftoppm_cmd: "pdftoppm".to_string(),
                min_direct_text_chars: extraction.min_direct_text_chars,
                text_batch_pages: extraction.text_batch_pages,
                text_max_pages: extraction.text_max_pages,
                raster_batch_pages: extraction.raster_batch_pages,
                raster_max_pages: extraction.raster_max_pages,
                dpi: extraction.dpi,
                ocr_timeout_secs: engine.timeout.as_secs(),
                raster_timeout_secs: 120,
                text_layer_timeout_secs: 30,
            },
            ingest: IngestSettings {
                inline_buffer_limit: 8 * 1024 * 1024,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                model: LlmConfig::default_model(LlmProvider::Gemini).to_string(),
                base_url: None,
                max_output_tokens: 400,
                retry: RetryPolicy::default(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let vars = Vars { lookup: &lookup };

        let storage_root: PathBuf = vars
            .string("STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.root);
        let temp_dir = vars
            .string("OCR_TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| storage_root.join("tmp"));

        let provider = vars.parse("LLM_PROVIDER", defaults.llm.provider)?;
        let (key_var, model_var, url_var) = match provider {
            LlmProvider::OpenAi => ("OPENAI_API_KEY", "OPENAI_MODEL", "OPENAI_BASE_URL"),
            LlmProvider::Gemini => ("GEMINI_API_KEY", "GEMINI_MODEL", "GEMINI_BASE_URL"),
        };

        let d = &defaults.ocr;
        Ok(Config {
            server: ServerConfig {
                host: vars.string("SERVER_HOST").unwrap_or(defaults.server.host),
                port: vars.parse("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                root: storage_root,
                temp_dir,
                max_upload_bytes: vars.parse("MAX_UPLOAD_BYTES", defaults.storage.max_upload_bytes)?,
            },
            database: DatabaseConfig {
                url: vars.string("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            ocr: OcrConfig {
                engine: vars.parse("OCR_ENGINE", d.engine)?,
                language: vars.string("OCR_LANG").unwrap_or_else(|| d.language.clone()),
                tesseract_cmd: vars
                    .string("TESSERACT_CMD")
                    .unwrap_or_else(|| d.tesseract_cmd.clone()),
                tessdata_dir: vars.string("TESSDATA_PREFIX"),
                pdftoppm_cmd: vars
                    .string("PDFTOPPM_CMD")
                    .unwrap_or_else(|| d.pdftoppm_cmd.clone()),
                min_direct_text_chars: vars.parse("OCR_PDF_MIN_TEXT_CHARS", d.min_direct_text_chars)?,
                text_batch_pages: vars.parse("OCR_PDF_TEXT_BATCH_PAGES", d.text_batch_pages)?,
                text_max_pages: vars.parse("OCR_PDF_TEXT_MAX_PAGES", d.text_max_pages)?,
                raster_batch_pages: vars.parse("OCR_PDF_BATCH_PAGES", d.raster_batch_pages)?,
                raster_max_pages: vars.parse("OCR_PDF_MAX_PAGES", d.raster_max_pages)?,
                dpi: vars.parse("OCR_PDF_DPI", d.dpi)?,
                ocr_timeout_secs: vars.parse("OCR_TIMEOUT_SECS", d.ocr_timeout_secs)?,
                raster_timeout_secs: vars.parse("OCR_RASTER_TIMEOUT_SECS", d.raster_timeout_secs)?,
                text_layer_timeout_secs: vars
                    .parse("OCR_TEXT_LAYER_TIMEOUT_SECS", d.text_layer_timeout_secs)?,
            },
            ingest: IngestSettings {
                inline_buffer_limit: vars
                    .parse("INGEST_INLINE_BUFFER_LIMIT", defaults.ingest.inline_buffer_limit)?,
            },
            llm: LlmConfig {
                provider,
                api_key: vars.string(key_var),
                model: vars
                    .string(model_var)
                    .unwrap_or_else(|| LlmConfig::default_model(provider).to_string()),
                base_url: vars.string(url_var),
                max_output_tokens: vars
                    .parse("OPENAI_MAX_OUTPUT_TOKENS", defaults.llm.max_output_tokens)?,
                retry: RetryPolicy {
                    retries: vars.parse("LLM_RETRIES", defaults.llm.retry.retries)?,
                    base_delay_ms: vars.parse("LLM_RETRY_BASE_MS", defaults.llm.retry.base_delay_ms)?,
                    max_delay_ms: vars.parse("LLM_RETRY_MAX_MS", defaults.llm.retry.max_delay_ms)?,
                },
            },
        })
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<'a, F> Vars<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-blank value of `key`
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.trim().parse::<T>().map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.storage.temp_dir, PathBuf::from("./storage").join("tmp"));
        assert_eq!(config.ocr.engine, OcrEngineKind::Native);
        assert_eq!(config.ocr.min_direct_text_chars, 80);
        assert_eq!(config.ocr.raster_max_pages, 30);
        assert_eq!(config.ingest.inline_buffer_limit, 8 * 1024 * 1024);
        assert_eq!(config.llm.provider, LlmProvider::Gemini);
        assert_eq!(config.llm.model, "gemini-2.5-flash");
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERVER_PORT", "8080"),
            ("OCR_ENGINE", "in-process"),
            ("OCR_PDF_MAX_PAGES", "12"),
            ("OCR_PDF_DPI", "300"),
            ("LLM_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("GEMINI_API_KEY", "ignored"),
            ("STORAGE_ROOT", "/srv/paggo"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ocr.engine, OcrEngineKind::InProcess);
        assert_eq!(config.ocr.extraction_config().raster_max_pages, 12);
        assert_eq!(config.ocr.extraction_config().dpi, 300);
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.storage.temp_dir, PathBuf::from("/srv/paggo/tmp"));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = config_from(&[("OCR_PDF_DPI", "high")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "OCR_PDF_DPI", .. }));

        assert!(config_from(&[("LLM_PROVIDER", "llama")]).is_err());
    }

    #[test]
    fn test_one_bad_value_fails_the_whole_load() {
        let err = config_from(&[
            ("DATABASE_URL", "sqlite:/var/lib/paggo/paggo.db"),
            ("GEMINI_API_KEY", "secret"),
            ("OCR_PDF_DPI", "high"),
        ])
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("OCR_PDF_DPI"));
        assert!(message.contains("high"));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = config_from(&[("SERVER_PORT", "  "), ("OCR_LANG", "")]).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ocr.language, "eng");
    }
}

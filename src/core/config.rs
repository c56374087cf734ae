use crate::core::errors::ConfigError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    pub public_dir: PathBuf,
}

/// Upstream chat-completion endpoint configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub stop_tokens: Vec<String>,
    /// Token the model emits inside its output to signal a failed translation
    pub failure_sentinel: Option<String>,
    pub read_timeout: Duration,
}

/// Remote PDF translation worker configuration
#[derive(Debug, Clone)]
pub struct PdfWorkerConfig {
    pub endpoint: String,
    pub service: String,
    pub threads: u32,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub translations_file: PathBuf,
    pub pdf_dir: PathBuf,
    pub save_translations: bool,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub pdf: PdfWorkerConfig,
    pub storage: StorageConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup instead of the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn load<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let stop_tokens = lookup("LLM_STOP_TOKENS")
            .map(|tokens| {
                tokens
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "<|plamo:op|>".to_string(),
                    "<|plamo:reserved:0x1E|>".to_string(),
                ]
            });

        Ok(Self {
            server: ServerConfig {
                port: parse_or(lookup, "SERVER_PORT", 4567)?,
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                log_level,
                public_dir: lookup("PUBLIC_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("public")),
            },
            llm: LlmConfig {
                endpoint: trim_endpoint(
                    lookup("LLM_ENDPOINT")
                        .unwrap_or_else(|| "http://host.docker.internal:1234".to_string()),
                ),
                model: lookup("LLM_MODEL").unwrap_or_else(|| "plamo-2-translate".to_string()),
                stop_tokens,
                failure_sentinel: lookup("LLM_FAILURE_SENTINEL").filter(|s| !s.is_empty()),
                read_timeout: Duration::from_secs(parse_or(
                    lookup,
                    "LLM_READ_TIMEOUT_SECONDS",
                    300,
                )?),
            },
            pdf: PdfWorkerConfig {
                endpoint: trim_endpoint(
                    lookup("PDF_TRANSLATE_ENDPOINT")
                        .unwrap_or_else(|| "http://pdf2zh:11007".to_string()),
                ),
                service: lookup("PDF_TRANSLATE_SERVICE")
                    .unwrap_or_else(|| "openailiked".to_string()),
                threads: parse_or(lookup, "PDF_WORKER_THREADS", 10)?,
                request_timeout: Duration::from_secs(parse_or(
                    lookup,
                    "PDF_REQUEST_TIMEOUT_SECONDS",
                    10,
                )?),
                download_timeout: Duration::from_secs(parse_or(
                    lookup,
                    "PDF_DOWNLOAD_TIMEOUT_SECONDS",
                    60,
                )?),
            },
            storage: StorageConfig {
                translations_file: lookup("TRANSLATIONS_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/translations.json")),
                pdf_dir: lookup("PDF_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("data/pdfs")),
                // Anything but an explicit "false" keeps persistence on
                save_translations: lookup("SAVE_TRANSLATIONS")
                    .map(|s| s.trim() != "false")
                    .unwrap_or(true),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if reqwest::Url::parse(&self.llm.endpoint).is_err() {
            return Err(ConfigError::InvalidEndpoint {
                name: "LLM_ENDPOINT",
                value: self.llm.endpoint.clone(),
            });
        }

        if reqwest::Url::parse(&self.pdf.endpoint).is_err() {
            return Err(ConfigError::InvalidEndpoint {
                name: "PDF_TRANSLATE_ENDPOINT",
                value: self.pdf.endpoint.clone(),
            });
        }

        if self.llm.read_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("LLM_READ_TIMEOUT_SECONDS"));
        }
        if self.pdf.request_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("PDF_REQUEST_TIMEOUT_SECONDS"));
        }
        if self.pdf.download_timeout.is_zero() {
            return Err(ConfigError::ZeroValue("PDF_DOWNLOAD_TIMEOUT_SECONDS"));
        }
        if self.pdf.threads == 0 {
            return Err(ConfigError::ZeroValue("PDF_WORKER_THREADS"));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn save_translations(&self) -> bool {
        self.storage.save_translations
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn trim_endpoint(endpoint: String) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

//! Configuration for meetvault.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STORAGE_MODE, INPUT_DIR, WORKER_COUNT, ...)
//! 2. Config file (.meetvault/config.yaml)
//! 3. Defaults (local mode, ./input ./output ./processed ./vault, ~/.meetvault)
//!
//! Config file discovery:
//! - Searches current directory and parents for .meetvault/config.yaml
//! - Paths in config file are relative to the config file's project root
//!   (the parent of `.meetvault/`)

pub mod paths;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::safety::SafetyLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<Settings, String>> = OnceLock::new();

const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Errors raised while resolving configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read config file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} is required in cloud storage mode")]
    MissingKey { key: &'static str },

    #[error("{key} points to a missing file: {}", .path.display())]
    MissingFile { key: &'static str, path: PathBuf },

    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub storage_mode: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub google_drive: DriveConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub safety: Option<SafetyConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory
    pub home: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub processed: Option<String>,
    pub vault: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveConfig {
    pub credentials_path: Option<String>,
    pub token_path: Option<String>,
    pub input_folder_id: Option<String>,
    pub output_folder_id: Option<String>,
    pub processed_folder_id: Option<String>,
    pub vault_folder_id: Option<String>,
    pub api_base: Option<String>,
    pub upload_base: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    pub worker_count: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub max_item_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    pub ffmpeg: Option<String>,
    pub whisper: Option<String>,
    pub whisper_model: Option<String>,
    pub fabric: Option<String>,
    pub analysis_pattern: Option<String>,
    pub entity_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafetyConfig {
    pub stage_timeout_secs: Option<u64>,
    pub max_source_bytes: Option<u64>,
    pub input_patterns: Option<Vec<String>>,
    pub denylist_patterns: Option<Vec<String>>,
}

/// Resolved configuration with absolute-or-cwd-relative paths
#[derive(Debug, Clone)]
pub struct Settings {
    /// State directory (registry, lock, scratch)
    pub home: PathBuf,
    pub storage: StorageSettings,
    pub vault: VaultSettings,
    pub orchestrator: OrchestratorSettings,
    pub tools: ToolSettings,
    pub safety: SafetyLimits,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Which backend to run against, with its settings
#[derive(Debug, Clone)]
pub enum StorageSettings {
    Local(LocalSettings),
    Cloud(CloudSettings),
}

impl StorageSettings {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Cloud(_) => "cloud",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub processed_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
    pub input_folder_id: String,
    pub output_folder_id: String,
    pub processed_folder_id: String,
    pub api_base: String,
    pub upload_base: String,
    pub token_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct VaultSettings {
    /// Local vault root
    pub local_path: PathBuf,
    /// Remote vault folder; only honored in cloud mode
    pub remote_folder_id: Option<String>,
}

impl VaultSettings {
    pub fn is_remote(&self) -> bool {
        self.remote_folder_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub max_item_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: 16,
            poll_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(60),
            max_item_attempts: 3,
            retry_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub ffmpeg_path: String,
    pub whisper_path: String,
    pub whisper_model: String,
    pub fabric_path: String,
    pub analysis_pattern: String,
    pub entity_pattern: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            whisper_path: "whisper".to_string(),
            whisper_model: "base".to_string(),
            fabric_path: "fabric".to_string(),
            analysis_pattern: "summarize_meeting".to_string(),
            entity_pattern: "extract_entities".to_string(),
        }
    }
}

impl Settings {
    /// Directory the task store writes to: the vault itself, or a mirror
    /// under home when the vault is remote
    pub fn task_root(&self) -> PathBuf {
        if self.vault.is_remote() {
            paths::vault_mirror(&self.home)
        } else {
            self.vault.local_path.clone()
        }
    }

    /// Resolve settings from an optional config file and an env lookup
    pub fn resolve(
        file: Option<(PathBuf, ConfigFile)>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let (config_file, file) = match file {
            Some((path, parsed)) => (Some(path), parsed),
            None => (None, ConfigFile::default()),
        };
        let layers = Layers {
            env,
            base: config_file
                .as_deref()
                .and_then(Path::parent) // .meetvault/
                .and_then(Path::parent) // project root
                .map(Path::to_path_buf),
        };

        let home = match layers.path("MEETVAULT_HOME", file.paths.home.as_deref()) {
            Some(home) => home,
            None => dirs::home_dir()
                .ok_or(ConfigurationError::NoHomeDir)?
                .join(".meetvault"),
        };

        let mode = layers
            .string("STORAGE_MODE", file.storage_mode.as_deref())
            .unwrap_or_else(|| "local".to_string());

        let drive = &file.google_drive;
        let storage = match mode.trim().to_ascii_lowercase().as_str() {
            "local" => StorageSettings::Local(LocalSettings {
                input_dir: layers.path_or("INPUT_DIR", file.paths.input.as_deref(), "./input"),
                output_dir: layers.path_or("OUTPUT_DIR", file.paths.output.as_deref(), "./output"),
                processed_dir: layers.path_or(
                    "PROCESSED_DIR",
                    file.paths.processed.as_deref(),
                    "./processed",
                ),
            }),
            "cloud" | "google_drive" | "drive" => {
                let credentials_path = layers.path_or(
                    "GOOGLE_DRIVE_CREDENTIALS_PATH",
                    drive.credentials_path.as_deref(),
                    "credentials.json",
                );
                let token_path = layers.path_or(
                    "GOOGLE_DRIVE_TOKEN_PATH",
                    drive.token_path.as_deref(),
                    "token.json",
                );
                if !credentials_path.exists() {
                    return Err(ConfigurationError::MissingFile {
                        key: "GOOGLE_DRIVE_CREDENTIALS_PATH",
                        path: credentials_path,
                    });
                }
                if !token_path.exists() {
                    return Err(ConfigurationError::MissingFile {
                        key: "GOOGLE_DRIVE_TOKEN_PATH",
                        path: token_path,
                    });
                }

                StorageSettings::Cloud(CloudSettings {
                    credentials_path,
                    token_path,
                    input_folder_id: layers.required(
                        "GOOGLE_DRIVE_INPUT_FOLDER_ID",
                        drive.input_folder_id.as_deref(),
                    )?,
                    output_folder_id: layers.required(
                        "GOOGLE_DRIVE_OUTPUT_FOLDER_ID",
                        drive.output_folder_id.as_deref(),
                    )?,
                    processed_folder_id: layers.required(
                        "GOOGLE_DRIVE_PROCESSED_FOLDER_ID",
                        drive.processed_folder_id.as_deref(),
                    )?,
                    api_base: layers
                        .string("GOOGLE_DRIVE_API_BASE", drive.api_base.as_deref())
                        .unwrap_or_else(|| DEFAULT_DRIVE_API_BASE.to_string()),
                    upload_base: layers
                        .string("GOOGLE_DRIVE_UPLOAD_BASE", drive.upload_base.as_deref())
                        .unwrap_or_else(|| DEFAULT_DRIVE_UPLOAD_BASE.to_string()),
                    token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
                })
            }
            _ => {
                return Err(ConfigurationError::Invalid {
                    key: "STORAGE_MODE",
                    value: mode,
                    reason: "expected 'local' or 'cloud'".to_string(),
                })
            }
        };

        let local_vault = match layers.path("VAULT_PATH", file.paths.vault.as_deref()) {
            Some(path) => path,
            None => layers.path_or("OBSIDIAN_VAULT_PATH", None, "./vault"),
        };
        let remote_vault = match storage {
            StorageSettings::Cloud(_) => {
                layers.string("GOOGLE_DRIVE_VAULT_FOLDER_ID", drive.vault_folder_id.as_deref())
            }
            StorageSettings::Local(_) => None,
        };
        let vault = VaultSettings {
            local_path: local_vault,
            remote_folder_id: remote_vault,
        };

        let defaults = OrchestratorSettings::default();
        let oc = &file.orchestrator;
        let orchestrator = OrchestratorSettings {
            worker_count: layers.number("WORKER_COUNT", oc.worker_count, defaults.worker_count)?,
            queue_capacity: layers.number(
                "QUEUE_CAPACITY",
                oc.queue_capacity,
                defaults.queue_capacity,
            )?,
            poll_interval: Duration::from_secs(layers.number(
                "POLL_INTERVAL_SECS",
                oc.poll_interval_secs,
                defaults.poll_interval.as_secs(),
            )?),
            shutdown_grace: Duration::from_secs(layers.number(
                "SHUTDOWN_GRACE_SECS",
                oc.shutdown_grace_secs,
                defaults.shutdown_grace.as_secs(),
            )?),
            max_item_attempts: layers.number(
                "MAX_ITEM_ATTEMPTS",
                oc.max_item_attempts,
                defaults.max_item_attempts,
            )?,
            retry_delay: Duration::from_secs(layers.number(
                "RETRY_DELAY_SECS",
                oc.retry_delay_secs,
                defaults.retry_delay.as_secs(),
            )?),
        };
        ensure_positive("WORKER_COUNT", orchestrator.worker_count as u64)?;
        ensure_positive("QUEUE_CAPACITY", orchestrator.queue_capacity as u64)?;
        ensure_positive("POLL_INTERVAL_SECS", orchestrator.poll_interval.as_secs())?;

        let tool_defaults = ToolSettings::default();
        let tc = &file.tools;
        let tools = ToolSettings {
            ffmpeg_path: layers
                .string("FFMPEG_PATH", tc.ffmpeg.as_deref())
                .unwrap_or(tool_defaults.ffmpeg_path),
            whisper_path: layers
                .string("WHISPER_PATH", tc.whisper.as_deref())
                .unwrap_or(tool_defaults.whisper_path),
            whisper_model: layers
                .string("WHISPER_MODEL", tc.whisper_model.as_deref())
                .unwrap_or(tool_defaults.whisper_model),
            fabric_path: layers
                .string("FABRIC_PATH", tc.fabric.as_deref())
                .unwrap_or(tool_defaults.fabric_path),
            analysis_pattern: layers
                .string("FABRIC_ANALYSIS_PATTERN", tc.analysis_pattern.as_deref())
                .unwrap_or(tool_defaults.analysis_pattern),
            entity_pattern: layers
                .string("FABRIC_ENTITY_PATTERN", tc.entity_pattern.as_deref())
                .unwrap_or(tool_defaults.entity_pattern),
        };

        let safety_defaults = SafetyLimits::default();
        let sc = file.safety.unwrap_or_default();
        let safety = SafetyLimits {
            stage_timeout_seconds: layers.number(
                "STAGE_TIMEOUT_SECS",
                sc.stage_timeout_secs,
                safety_defaults.stage_timeout_seconds,
            )?,
            max_source_bytes: layers.number(
                "MAX_SOURCE_BYTES",
                sc.max_source_bytes,
                safety_defaults.max_source_bytes,
            )?,
            input_patterns: match env("INPUT_PATTERNS") {
                Some(raw) => split_patterns(&raw),
                None => sc.input_patterns.unwrap_or(safety_defaults.input_patterns),
            },
            denylist_patterns: sc
                .denylist_patterns
                .unwrap_or(safety_defaults.denylist_patterns),
        };
        ensure_positive("STAGE_TIMEOUT_SECS", safety.stage_timeout_seconds)?;
        if safety.input_patterns.is_empty() {
            return Err(ConfigurationError::Invalid {
                key: "INPUT_PATTERNS",
                value: String::new(),
                reason: "at least one pattern is required".to_string(),
            });
        }
        for pattern in &safety.input_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigurationError::Invalid {
                    key: "INPUT_PATTERNS",
                    value: pattern.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(Settings {
            home,
            storage,
            vault,
            orchestrator,
            tools,
            safety,
            config_file,
        })
    }
}

/// Env-over-file-over-default lookup helpers
struct Layers<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
    /// Base for relative paths in the config file
    base: Option<PathBuf>,
}

impl Layers<'_> {
    fn string(&self, key: &str, from_file: Option<&str>) -> Option<String> {
        (self.env)(key)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| from_file.map(str::to_string))
    }

    fn required(
        &self,
        key: &'static str,
        from_file: Option<&str>,
    ) -> Result<String, ConfigurationError> {
        self.string(key, from_file)
            .ok_or(ConfigurationError::MissingKey { key })
    }

    fn path(&self, key: &str, from_file: Option<&str>) -> Option<PathBuf> {
        if let Some(value) = (self.env)(key).filter(|v| !v.trim().is_empty()) {
            return Some(PathBuf::from(value));
        }
        from_file.map(|p| match &self.base {
            Some(base) => resolve_path(base, p),
            None => PathBuf::from(p),
        })
    }

    fn path_or(&self, key: &str, from_file: Option<&str>, default: &str) -> PathBuf {
        self.path(key, from_file)
            .unwrap_or_else(|| PathBuf::from(default))
    }

    fn number<T: FromStr + Copy>(
        &self,
        key: &'static str,
        from_file: Option<T>,
        default: T,
    ) -> Result<T, ConfigurationError>
    where
        T::Err: std::fmt::Display,
    {
        match (self.env)(key).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigurationError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(from_file.unwrap_or(default)),
        }
    }
}

fn ensure_positive(key: &'static str, value: u64) -> Result<(), ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".meetvault").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigurationError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&content).map_err(|source| ConfigurationError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
pub fn load_settings() -> Result<Settings, ConfigurationError> {
    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    Settings::resolve(file, &|key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn settings() -> anyhow::Result<&'static Settings> {
    let result = CONFIG.get_or_init(|| load_settings().map_err(|e| e.to_string()));

    match result {
        Ok(settings) => Ok(settings),
        Err(e) => anyhow::bail!("{}", e),
    }
}

//! Process configuration, loaded entirely from environment variables.
//!
//! Unlike the TUI application this service was adapted from (which persists
//! a TOML file under the user's config directory), every setting here comes
//! from the environment so the service behaves identically whether it's run
//! directly or inside a container. The nested `serde`-derived shape is kept
//! so the live config can be served verbatim as the `/api/v1/config` JSON
//! snapshot.

use serde::{Deserialize, Serialize};
use std::env;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow::anyhow!("invalid boolean for {key}: {raw:?}")),
        },
        Err(_) => Ok(default),
    }
}

/// Rewrite the legacy `postgres://` scheme some deployments still emit to
/// the `postgresql://` scheme the driver expects. Mirrors the database
/// module of the system this service's behavior was distilled from.
fn normalize_database_url(url: String) -> String {
    if let Some(rest) = url.strip_prefix("postgres://") {
        format!("postgresql://{rest}")
    } else {
        url
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub media_path: String,
    pub models_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// 0 = auto (intra-op thread count; inter-op is always 1).
    pub threads: usize,
    /// Inter-photo pacing delay, in milliseconds.
    pub delay_ms: u64,
    /// Reserved — no behavior in the core pipeline.
    pub batch_size: usize,
    /// Reserved — no behavior in the core pipeline.
    pub max_cpu_percent: u32,
    /// Reserved — no behavior in the core pipeline.
    pub idle_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoStartConfig {
    pub auto_start: bool,
    /// Seconds between scan-timer checks; 0 disables the timer.
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacesConfig {
    pub enabled: bool,
    pub min_confidence: f32,
    pub min_size: u32,
    pub max_per_photo: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub threshold: f32,
    /// Reserved — no behavior in the core pipeline.
    pub min_faces: usize,
    /// Reserved — no behavior in the core pipeline.
    pub auto_merge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsConfig {
    pub enabled: bool,
    pub min_confidence: f32,
    pub max_per_photo: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    Auto,
    Full,
    Off,
}

impl std::str::FromStr for OcrMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(OcrMode::Auto),
            "full" => Ok(OcrMode::Full),
            "off" => Ok(OcrMode::Off),
            other => Err(anyhow::anyhow!("invalid AI_OCR_MODE: {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub enabled: bool,
    pub mode: OcrMode,
    pub min_confidence: f32,
    pub update_taken_at: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub ttl_secs: u64,
    /// Reserved — eager preload at start; the idle-unload path is canonical.
    pub preload: bool,
    pub repo_override: Option<String>,
    pub idle_unload_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_each_photo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub api: ApiConfig,
    pub performance: PerformanceConfig,
    pub auto_start: AutoStartConfig,
    pub faces: FacesConfig,
    pub cluster: ClusterConfig,
    pub tags: TagsConfig,
    pub ocr: OcrConfig,
    pub models: ModelsConfig,
    pub logging: LoggingConfig,
    pub max_retries: u32,
}

impl Config {
    /// Load configuration from the process environment, applying the same
    /// defaults as the reference settings module. An invalid value for a
    /// typed field is a startup-time hard error — this service fails fast
    /// on bad configuration rather than silently falling back.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database: DatabaseConfig {
                url: normalize_database_url(env_string(
                    "DATABASE_URL",
                    "postgresql://imgable:imgable@db:5432/imgable",
                )),
            },
            paths: PathsConfig {
                media_path: env_string("MEDIA_PATH", "/media"),
                models_path: env_string("MODELS_PATH", "/models"),
            },
            api: ApiConfig {
                host: env_string("API_HOST", "0.0.0.0"),
                port: env_parse("API_PORT", 8004u16)?,
            },
            performance: PerformanceConfig {
                threads: env_parse("AI_THREADS", 0usize)?,
                delay_ms: env_parse("AI_DELAY_MS", 100u64)?,
                batch_size: env_parse("AI_BATCH_SIZE", 1usize)?,
                max_cpu_percent: env_parse("AI_MAX_CPU_PERCENT", 0u32)?,
                idle_only: env_bool("AI_IDLE_ONLY", false)?,
            },
            auto_start: AutoStartConfig {
                auto_start: env_bool("AI_AUTO_START", true)?,
                scan_interval_secs: env_parse("AI_SCAN_INTERVAL", 3600u64)?,
            },
            faces: FacesConfig {
                enabled: env_bool("AI_FACES_ENABLED", true)?,
                min_confidence: env_parse("AI_FACES_MIN_CONFIDENCE", 0.5f32)?,
                min_size: env_parse("AI_FACES_MIN_SIZE", 30u32)?,
                max_per_photo: env_parse("AI_FACES_MAX_PER_PHOTO", 50usize)?,
            },
            cluster: ClusterConfig {
                threshold: env_parse("AI_CLUSTER_THRESHOLD", 0.6f32)?,
                min_faces: env_parse("AI_CLUSTER_MIN_FACES", 3usize)?,
                auto_merge: env_bool("AI_CLUSTER_AUTO_MERGE", true)?,
            },
            tags: TagsConfig {
                enabled: env_bool("AI_TAGS_ENABLED", true)?,
                min_confidence: env_parse("AI_TAGS_MIN_CONFIDENCE", 0.15f32)?,
                max_per_photo: env_parse("AI_TAGS_MAX_PER_PHOTO", 10usize)?,
            },
            ocr: OcrConfig {
                enabled: env_bool("AI_OCR_ENABLED", true)?,
                mode: env::var("AI_OCR_MODE")
                    .ok()
                    .map(|v| v.parse())
                    .transpose()?
                    .unwrap_or(OcrMode::Auto),
                min_confidence: env_parse("AI_OCR_MIN_CONFIDENCE", 0.7f32)?,
                update_taken_at: env_bool("AI_OCR_UPDATE_TAKEN_AT", true)?,
            },
            models: ModelsConfig {
                ttl_secs: env_parse("AI_MODEL_TTL", 1800u64)?,
                preload: env_bool("AI_MODEL_PRELOAD", true)?,
                repo_override: env::var("AI_MODEL_REPO").ok(),
                // Not given an explicit default anywhere in the retrieved
                // reference configuration; 30 minutes is a reasonable
                // middle ground between the model TTL default (30 min) and
                // leaving large models resident indefinitely.
                idle_unload_minutes: env_parse("AI_IDLE_UNLOAD_MINUTES", 30u64)?,
            },
            logging: LoggingConfig {
                level: env_string("AI_LOG_LEVEL", "info"),
                log_each_photo: env_bool("AI_LOG_EACH_PHOTO", false)?,
            },
            max_retries: env_parse("AI_MAX_RETRIES", 3u32)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_legacy_postgres_scheme() {
        assert_eq!(
            normalize_database_url("postgres://u:p@host/db".to_string()),
            "postgresql://u:p@host/db"
        );
    }

    #[test]
    fn leaves_postgresql_scheme_untouched() {
        assert_eq!(
            normalize_database_url("postgresql://u:p@host/db".to_string()),
            "postgresql://u:p@host/db"
        );
    }

    #[test]
    fn ocr_mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<OcrMode>().unwrap(), OcrMode::Auto);
        assert_eq!("full".parse::<OcrMode>().unwrap(), OcrMode::Full);
        assert!("bogus".parse::<OcrMode>().is_err());
    }
}

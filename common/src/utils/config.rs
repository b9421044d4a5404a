use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Process-wide configuration, sourced from an optional `config.toml` and
/// environment variables (`Environment::default()` uppercases/underscores
/// field names, matching the teacher's convention).
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    pub http_port: u16,

    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// `tempDir` (section 6) - scratch root for in-flight upload scopes.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    /// `romDir` (section 6) - final catalog storage root.
    #[serde(default = "default_rom_dir")]
    pub rom_dir: String,

    /// `maxFileSize` (section 6) - hard byte cap applied before any per-platform cap.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// `chunkSize` (section 6) - default chunk size offered to clients; clients may
    /// request a smaller one but never larger.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// `uploadTimeout` (section 6), seconds - `expires_at = now + upload_timeout_secs`.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// `maxConcurrentUploads` (section 6) - bounds the upload-coordinator worker pool.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// `metadataSources` (section 6) - enabled source identifiers, priority order.
    #[serde(default = "default_metadata_sources")]
    pub metadata_sources: Vec<String>,
    /// `archiveBombRatio` (section 4.2/section 8) - compression ratio above which extraction
    /// is refused.
    #[serde(default = "default_archive_bomb_ratio")]
    pub archive_bomb_ratio: u64,
    /// `progressQueueDepth` (section 4.6) - per-subscriber bounded queue depth.
    #[serde(default = "default_progress_queue_depth")]
    pub progress_queue_depth: usize,
    /// `retentionDays` (section 3/section 9c) - age after which terminal Upload rows are
    /// reaped by the maintenance scheduler's expiry sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Per-source metadata call deadline, seconds (section 4.5 step 2 / section 5).
    #[serde(default = "default_metadata_source_timeout_secs")]
    pub metadata_source_timeout_secs: u64,
    /// LRU capacity for the metadata cache (section 4.5 step 1).
    #[serde(default = "default_metadata_cache_capacity")]
    pub metadata_cache_capacity: usize,
    /// Bounded fan-out across metadata sources (section 5).
    #[serde(default = "default_max_metadata_sources_concurrent")]
    pub max_metadata_sources_concurrent: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_temp_dir() -> String {
    "./data/temp".to_string()
}
fn default_rom_dir() -> String {
    "./data/roms".to_string()
}
const fn default_max_file_size() -> u64 {
    4 * 1024 * 1024 * 1024
}
const fn default_chunk_size() -> u64 {
    4 * 1024 * 1024
}
const fn default_upload_timeout_secs() -> u64 {
    60 * 60
}
const fn default_max_concurrent_uploads() -> usize {
    8
}
fn default_metadata_sources() -> Vec<String> {
    vec!["fallback".to_string()]
}
const fn default_archive_bomb_ratio() -> u64 {
    100
}
const fn default_progress_queue_depth() -> usize {
    64
}
const fn default_retention_days() -> u64 {
    1
}
const fn default_metadata_source_timeout_secs() -> u64 {
    30
}
const fn default_metadata_cache_capacity() -> usize {
    4096
}
const fn default_max_metadata_sources_concurrent() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "catalog".into(),
            surrealdb_database: "catalog".into(),
            http_port: 8080,
            storage: default_storage_kind(),
            data_dir: default_data_dir(),
            temp_dir: default_temp_dir(),
            rom_dir: default_rom_dir(),
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            upload_timeout_secs: default_upload_timeout_secs(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            metadata_sources: default_metadata_sources(),
            archive_bomb_ratio: default_archive_bomb_ratio(),
            progress_queue_depth: default_progress_queue_depth(),
            retention_days: default_retention_days(),
            metadata_source_timeout_secs: default_metadata_source_timeout_secs(),
            metadata_cache_capacity: default_metadata_cache_capacity(),
            max_metadata_sources_concurrent: default_max_metadata_sources_concurrent(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_budgets() {
        let config = AppConfig::default();
        assert!(config.max_file_size >= config.chunk_size);
        assert_eq!(config.storage, StorageKind::Local);
    }
}

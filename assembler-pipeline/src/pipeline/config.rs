use common::utils::config::AppConfig;
use platform_registry::PlatformId;

#[derive(Debug, Clone)]
pub struct AssemblerTuning {
    pub archive_bomb_ratio: u64,
    /// Archive bomb rejection also fires on raw extracted size, independent
    /// of ratio: the largest registered platform's size cap, doubled.
    pub max_extracted_bytes: u64,
    pub metadata_timeout_secs: u64,
    pub lease_secs: i64,
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub tuning: AssemblerTuning,
}

fn largest_platform_cap() -> u64 {
    PlatformId::ALL
        .into_iter()
        .map(platform_registry::max_size)
        .max()
        .unwrap_or(0)
}

impl AssemblerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: AssemblerTuning {
                archive_bomb_ratio: config.archive_bomb_ratio,
                max_extracted_bytes: largest_platform_cap().saturating_mul(2),
                metadata_timeout_secs: config.metadata_source_timeout_secs,
                lease_secs: common::storage::types::upload::DEFAULT_LEASE_SECS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_bounds_from_app_config() {
        let app_config = AppConfig {
            archive_bomb_ratio: 50,
            ..Default::default()
        };
        let config = AssemblerConfig::from_app_config(&app_config);
        assert_eq!(config.tuning.archive_bomb_ratio, 50);
        assert_eq!(config.tuning.max_extracted_bytes, 900 * 1024 * 1024 * 2);
    }
}

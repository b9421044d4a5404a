use super::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestValidationError {
    PayloadTooLarge(String),
    BadRequest(String),
}

/// Cheap, config-driven bounds checks applied before an Upload is even
/// allocated - the platform-specific size cap (C1) is checked separately
/// once the platform has been classified.
pub fn validate_initiate_input(
    config: &AppConfig,
    declared_size: u64,
    chunk_size: u64,
) -> Result<(), IngestValidationError> {
    if declared_size == 0 {
        return Err(IngestValidationError::BadRequest(
            "declared_size must be greater than zero".to_string(),
        ));
    }

    if declared_size > config.max_file_size {
        return Err(IngestValidationError::PayloadTooLarge(format!(
            "File is too large. Maximum allowed is {} bytes",
            config.max_file_size
        )));
    }

    if chunk_size == 0 || chunk_size > config.chunk_size {
        return Err(IngestValidationError::BadRequest(format!(
            "chunk_size must be between 1 and {} bytes",
            config.chunk_size
        )));
    }

    Ok(())
}

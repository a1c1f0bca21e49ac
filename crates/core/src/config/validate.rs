use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - At least one deposit slot and one worker per channel
/// - Job sequence is non-empty, class names are non-empty and unique
/// - Cleanup job is not part of the sequence
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Coordinator validation
    let coordinator = &config.coordinator;
    if coordinator.max_concurrent_deposits == 0 {
        return Err(ConfigError::ValidationError(
            "coordinator.max_concurrent_deposits must be at least 1".to_string(),
        ));
    }
    if coordinator.operation_workers == 0 || coordinator.job_workers == 0 {
        return Err(ConfigError::ValidationError(
            "coordinator worker counts must be at least 1".to_string(),
        ));
    }

    // Job validation
    if config.jobs.sequence.is_empty() {
        return Err(ConfigError::ValidationError(
            "jobs.sequence cannot be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for job in &config.jobs.sequence {
        if job.class.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "job class cannot be empty".to_string(),
            ));
        }
        if !seen.insert(job.class.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "job class {} appears twice in jobs.sequence",
                job.class
            )));
        }
    }
    let cleanup = &config.jobs.cleanup.class;
    if cleanup.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "jobs.cleanup.class cannot be empty".to_string(),
        ));
    }
    if seen.contains(cleanup.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "cleanup job {} cannot also be part of jobs.sequence",
            cleanup
        )));
    }

    Ok(())
}

use super::{types::Config, ConfigError};
use crate::pipeline::PipelineDefinition;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Stage timeouts are positive and keyed by pipeline stages
/// - Dispatcher retry policy and timeouts are usable
/// - Orchestrator intervals are positive
///
/// Broker URLs are checked when the broker registry is built.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.pipeline.default_stage_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.default_stage_timeout_secs must be greater than 0".to_string(),
        ));
    }
    if let Some((stage, _)) = config.pipeline.stage_timeouts.iter().find(|(_, s)| **s == 0) {
        return Err(ConfigError::ValidationError(format!(
            "pipeline.stage_timeouts.{} must be greater than 0",
            stage
        )));
    }
    PipelineDefinition::standard()
        .resolve_stage_timeouts(&config.pipeline.stage_timeouts)
        .map_err(|e| ConfigError::ValidationError(format!("pipeline.stage_timeouts: {}", e)))?;

    let retry = &config.dispatcher.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "dispatcher.max_attempts must be at least 1".to_string(),
        ));
    }
    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "dispatcher.backoff_multiplier must be at least 1.0".to_string(),
        ));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::ValidationError(
            "dispatcher.initial_delay_ms cannot exceed dispatcher.max_delay_ms".to_string(),
        ));
    }

    if config.dispatcher.publish_timeout_ms == 0 || config.dispatcher.connect_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "dispatcher timeouts must be greater than 0".to_string(),
        ));
    }

    if config.orchestrator.timeout_sweep_interval_ms == 0
        || config.orchestrator.redispatch_interval_ms == 0
    {
        return Err(ConfigError::ValidationError(
            "orchestrator intervals must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

use crate::config::TrainingConfig;
use crate::error::{MfError, Result};
use crate::models::Rating;

pub fn validate_training_config(config: &TrainingConfig) -> Result<()> {
    if config.num_factors == 0 {
        return Err(invalid("training.num_factors must be at least 1"));
    }

    if !(config.learning_rate.is_finite() && config.learning_rate > 0.0) {
        return Err(invalid("training.learning_rate must be a positive number"));
    }

    if !(config.regularization.is_finite() && config.regularization >= 0.0) {
        return Err(invalid("training.regularization must be non-negative"));
    }

    if !(config.split_ratio > 0.0 && config.split_ratio < 1.0) {
        return Err(invalid("training.split_ratio must lie strictly between 0 and 1"));
    }

    if config.iterations == 0 {
        return Err(invalid("training.iterations must be at least 1"));
    }

    if config.sync_interval == Some(0) {
        return Err(invalid("training.sync_interval must be at least 1"));
    }

    Ok(())
}

/// Rejects rows whose rating cannot take part in SGD.
pub fn validate_rating(rating: &Rating, line: u64) -> Result<()> {
    if !rating.rating.is_finite() {
        return Err(MfError::MalformedRow {
            line,
            reason: format!("rating {} is not a finite number", rating.rating),
        });
    }
    Ok(())
}

/// Checks a model file header and converts it to table dimensions.
pub fn validate_model_header(num_users: i32, num_items: i32, num_factors: i32) -> Result<(usize, usize, usize)> {
    if num_users < 0 || num_items < 0 || num_factors < 0 {
        return Err(MfError::CorruptModel(format!(
            "negative dimensions in header ({}, {}, {})",
            num_users, num_items, num_factors
        )));
    }
    if num_factors == 0 && (num_users > 0 || num_items > 0) {
        return Err(MfError::CorruptModel(
            "model has entities but zero latent factors".to_string(),
        ));
    }
    Ok((num_users as usize, num_items as usize, num_factors as usize))
}

fn invalid(message: &str) -> MfError {
    MfError::InvalidConfig(message.to_string())
}

//! Feed configuration.

use serde::{Deserialize, Serialize};

use crate::error::{FeedResult, ValidationError};

/// Tunables shared by the subscriptions of one publication.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Max queued change notifications per subscription before a resync is scheduled.
    pub notification_queue_capacity: usize,
    /// Max queued control messages per subscription worker.
    pub control_queue_capacity: usize,
    /// Buffer capacity of a `ChannelSink`.
    pub stream_capacity: usize,
    /// Name of the injected attribute carrying the publication id.
    pub subscription_field: String,
    /// Name of the injected attribute carrying the row rank.
    pub rank_field: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            notification_queue_capacity: 4096,
            control_queue_capacity: 16,
            stream_capacity: 1024,
            subscription_field: "feed-id".to_string(),
            rank_field: "feed-rank".to_string(),
        }
    }
}

impl FeedConfig {
    /// Parse a JSON config; missing keys take their defaults.
    pub fn from_json_str(text: &str) -> FeedResult<Self> {
        let cfg: Self = serde_json::from_str(text).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that the injected attribute names are usable.
    pub fn validate(&self) -> FeedResult<()> {
        if self.subscription_field.is_empty() || self.rank_field.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "injected field names cannot be empty".to_string(),
            }
            .into());
        }
        if self.subscription_field == self.rank_field {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "subscription_field and rank_field must differ (both '{}')",
                    self.rank_field
                ),
            }
            .into());
        }
        Ok(())
    }
}

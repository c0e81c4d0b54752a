//! Publish result bookkeeping.
//!
//! Each published video carries a map of platform name to [`PlatformEntry`].
//! [`derive_overall_status`] is the single place the aggregate status is
//! computed; the repository calls it after every merge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per-platform publish status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl PlatformStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlatformStatus::Published | PlatformStatus::Failed)
    }
}

/// Aggregate status of a published video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Pending => "pending",
            OverallStatus::Processing => "processing",
            OverallStatus::Published => "published",
            OverallStatus::Failed => "failed",
        }
    }
}

/// Result of one platform's publish attempt(s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlatformEntry {
    pub status: PlatformStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PlatformEntry {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: PlatformStatus::Pending,
            platform_video_id: None,
            platform_url: None,
            error_message: None,
            retry_count: 0,
            published_at: None,
            updated_at: Some(now),
        }
    }
}

pub type PlatformMap = BTreeMap<String, PlatformEntry>;

/// Outcome reported for a single platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published {
        platform_video_id: String,
        platform_url: String,
        published_at: DateTime<Utc>,
    },
    Processing,
    Failed {
        error_message: String,
        retry_count: u32,
    },
}

impl PublishOutcome {
    /// Applies the outcome on top of the previous entry for the platform, if any.
    pub fn merge_into(&self, previous: Option<&PlatformEntry>, now: DateTime<Utc>) -> PlatformEntry {
        let mut entry = previous.cloned().unwrap_or_else(|| PlatformEntry::pending(now));
        entry.updated_at = Some(now);

        match self {
            PublishOutcome::Published {
                platform_video_id,
                platform_url,
                published_at,
            } => {
                entry.status = PlatformStatus::Published;
                entry.platform_video_id = Some(platform_video_id.clone());
                entry.platform_url = Some(platform_url.clone());
                entry.published_at = Some(*published_at);
                entry.error_message = None;
            }
            PublishOutcome::Processing => {
                entry.status = PlatformStatus::Processing;
                entry.error_message = None;
            }
            PublishOutcome::Failed {
                error_message,
                retry_count,
            } => {
                entry.status = PlatformStatus::Failed;
                entry.error_message = Some(error_message.clone());
                entry.retry_count = *retry_count;
            }
        }
        entry
    }
}

/// Derives the aggregate status from the per-platform entries.
///
/// - no platforms: pending
/// - every platform published: published
/// - any platform still pending or processing: pending when all are pending,
///   otherwise processing
/// - all terminal with at least one failure: failed
pub fn derive_overall_status(platforms: &PlatformMap) -> OverallStatus {
    if platforms.is_empty() {
        return OverallStatus::Pending;
    }

    let statuses: Vec<PlatformStatus> = platforms.values().map(|entry| entry.status).collect();

    if statuses.iter().all(|s| *s == PlatformStatus::Published) {
        return OverallStatus::Published;
    }

    if statuses.iter().any(|s| !s.is_terminal()) {
        if statuses.iter().all(|s| *s == PlatformStatus::Pending) {
            return OverallStatus::Pending;
        }
        return OverallStatus::Processing;
    }

    OverallStatus::Failed
}

/// Parses the JSON column into a platform map; malformed entries are dropped.
pub fn platforms_from_json(value: &serde_json::Value) -> PlatformMap {
    let Some(object) = value.as_object() else {
        return PlatformMap::new();
    };

    object
        .iter()
        .filter_map(|(platform, entry)| match serde_json::from_value(entry.clone()) {
            Ok(entry) => Some((platform.clone(), entry)),
            Err(error) => {
                tracing::warn!(platform = %platform, %error, "Dropping malformed platform entry");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, PlatformStatus)]) -> PlatformMap {
        let now = Utc::now();
        entries
            .iter()
            .map(|(name, status)| {
                let mut entry = PlatformEntry::pending(now);
                entry.status = *status;
                (name.to_string(), entry)
            })
            .collect()
    }

    #[test]
    fn test_empty_map_is_pending() {
        assert_eq!(derive_overall_status(&PlatformMap::new()), OverallStatus::Pending);
    }

    #[test]
    fn test_all_published() {
        let platforms = map(&[
            ("instagram", PlatformStatus::Published),
            ("youtube", PlatformStatus::Published),
        ]);
        assert_eq!(derive_overall_status(&platforms), OverallStatus::Published);
    }

    #[test]
    fn test_all_pending() {
        let platforms = map(&[
            ("instagram", PlatformStatus::Pending),
            ("tiktok", PlatformStatus::Pending),
        ]);
        assert_eq!(derive_overall_status(&platforms), OverallStatus::Pending);
    }

    #[test]
    fn test_mixed_in_flight_is_processing() {
        let platforms = map(&[
            ("instagram", PlatformStatus::Published),
            ("tiktok", PlatformStatus::Pending),
        ]);
        assert_eq!(derive_overall_status(&platforms), OverallStatus::Processing);

        let platforms = map(&[
            ("instagram", PlatformStatus::Failed),
            ("tiktok", PlatformStatus::Processing),
        ]);
        assert_eq!(derive_overall_status(&platforms), OverallStatus::Processing);
    }

    #[test]
    fn test_terminal_with_failure_is_failed() {
        let platforms = map(&[
            ("instagram", PlatformStatus::Published),
            ("tiktok", PlatformStatus::Failed),
        ]);
        assert_eq!(derive_overall_status(&platforms), OverallStatus::Failed);
    }

    #[test]
    fn test_published_outcome_clears_error_and_keeps_retry_count() {
        let now = Utc::now();
        let failed = PublishOutcome::Failed {
            error_message: "upstream unavailable".to_string(),
            retry_count: 2,
        }
        .merge_into(None, now);
        assert_eq!(failed.retry_count, 2);

        let published = PublishOutcome::Published {
            platform_video_id: "v1".to_string(),
            platform_url: "https://example.com/v1".to_string(),
            published_at: now,
        }
        .merge_into(Some(&failed), now);

        assert_eq!(published.status, PlatformStatus::Published);
        assert_eq!(published.error_message, None);
        assert_eq!(published.retry_count, 2);
        assert_eq!(published.platform_video_id.as_deref(), Some("v1"));
    }

    #[test]
    fn test_platforms_from_json_skips_malformed_entries() {
        let value = serde_json::json!({
            "instagram": {"status": "published", "platform_video_id": "1"},
            "tiktok": {"status": "exploded"},
        });
        let platforms = platforms_from_json(&value);
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms["instagram"].retry_count, 0);
    }
}

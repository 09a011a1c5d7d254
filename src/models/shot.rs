//! Represents one uploaded shooting-form video and its analysis metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, types::Json};
use std::str::FromStr;
use uuid::Uuid;

/// Shooting hand supplied by the uploader. Stored and echoed, never interpreted.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
}

impl FromStr for Handedness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Handedness::Left),
            "right" => Ok(Handedness::Right),
            _ => Err(s.to_string()),
        }
    }
}

/// A shot record as stored in the `shots` table and returned by the API.
///
/// `processed_url`, `score` and `analysis` start out unset. They are written
/// once, by the external ML worker, which also stamps `analyzed_at`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Shot {
    /// Server-generated record id.
    pub id: Uuid,

    /// Uid of the caller who uploaded the video, taken from the verified token.
    pub owner: String,

    /// Key of the video in object storage.
    pub storage_key: String,

    /// Public URL of the originally uploaded video.
    pub source_url: String,

    pub content_type: String,

    pub size_bytes: i64,

    pub hand: Option<Handedness>,

    /// URL of the annotated video produced by the ML worker.
    pub processed_url: Option<String>,

    /// Similarity score in [0, 100].
    pub score: Option<f64>,

    /// Free-form feedback from the ML worker.
    pub analysis: Option<Json<Value>>,

    pub created_at: DateTime<Utc>,

    pub analyzed_at: Option<DateTime<Utc>>,
}

/// Fields known at upload time.
#[derive(Clone, Debug)]
pub struct NewShot {
    pub owner: String,
    pub storage_key: String,
    pub source_url: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub hand: Option<Handedness>,
    pub created_at: DateTime<Utc>,
}

/// Result posted back by the ML worker.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisUpdate {
    pub processed_url: Option<String>,
    pub score: Option<f64>,
    pub analysis: Option<Value>,
}

impl AnalysisUpdate {
    /// True when the update carries no result at all.
    pub fn is_empty(&self) -> bool {
        self.processed_url.is_none() && self.score.is_none() && self.analysis.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handedness_parses_case_insensitively() {
        assert_eq!("Left".parse::<Handedness>(), Ok(Handedness::Left));
        assert_eq!(" right ".parse::<Handedness>(), Ok(Handedness::Right));
        assert!("both".parse::<Handedness>().is_err());
    }

    #[test]
    fn analysis_update_without_fields_is_empty() {
        let empty: AnalysisUpdate = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());

        let partial: AnalysisUpdate = serde_json::from_str(r#"{"score": 80}"#).unwrap();
        assert!(!partial.is_empty());
        assert_eq!(partial.score, Some(80.0));
    }

    #[test]
    fn shot_serializes_with_camel_case_fields() {
        let shot = Shot {
            id: Uuid::nil(),
            owner: "uid-1".into(),
            storage_key: "videos/1_a.mp4".into(),
            source_url: "http://localhost/objects/videos/1_a.mp4".into(),
            content_type: "video/mp4".into(),
            size_bytes: 3,
            hand: Some(Handedness::Left),
            processed_url: None,
            score: None,
            analysis: None,
            created_at: Utc::now(),
            analyzed_at: None,
        };

        let value = serde_json::to_value(&shot).unwrap();
        assert_eq!(value["sourceUrl"], "http://localhost/objects/videos/1_a.mp4");
        assert_eq!(value["hand"], "left");
        assert!(value["processedUrl"].is_null());
        assert!(value["score"].is_null());
        assert!(value.get("createdAt").is_some());
    }
}

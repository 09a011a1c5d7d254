//! Placeholder shooting-form analysis.
//!
//! The real scoring runs in an external ML worker that later reports back
//! through the analysis callback. Until then uploads get a random score.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;

pub const ANALYSIS_COMPLETE: &str = "Analysis complete!";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Always within 0..=100.
    pub score: u8,
    pub message: String,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, storage_key: &str) -> AnalysisResult;
}

/// Draws a uniform score in 0..=100.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomAnalyzer;

#[async_trait]
impl Analyzer for RandomAnalyzer {
    async fn analyze(&self, storage_key: &str) -> AnalysisResult {
        tracing::info!("Running ML analysis on file: {}", storage_key);
        let score = rand::rng().random_range(0..=100u8);
        AnalysisResult {
            score,
            message: ANALYSIS_COMPLETE.to_string(),
        }
    }
}

/// Returns the same score for every key.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnalyzer(pub u8);

#[async_trait]
impl Analyzer for FixedAnalyzer {
    async fn analyze(&self, _storage_key: &str) -> AnalysisResult {
        AnalysisResult {
            score: self.0.min(100),
            message: ANALYSIS_COMPLETE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn random_scores_stay_in_range() {
        let analyzer = RandomAnalyzer;
        for i in 0..500 {
            let result = analyzer.analyze(&format!("videos/{}_x.mp4", i)).await;
            assert!(result.score <= 100);
            assert_eq!(result.message, ANALYSIS_COMPLETE);
        }
    }

    #[tokio::test]
    async fn fixed_analyzer_clamps() {
        assert_eq!(FixedAnalyzer(250).analyze("k").await.score, 100);
        assert_eq!(FixedAnalyzer(42).analyze("k").await.score, 42);
    }
}

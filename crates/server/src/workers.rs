//! Handlers for the provider-facing task types.

use std::sync::Arc;

use async_trait::async_trait;
use matchwatch_common::BoxError;
use matchwatch_queue::{AnalyzePlayersJob, FetchMatchHistoryJob, Payload, TaskHandler, TaskJob};
use matchwatch_ratelimit::ApiClient;
use serde_json::Value;
use tracing::{debug, info};

/// Fetches match ids for one player through the rate-limited client.
pub struct FetchMatchHistoryWorker {
    client: ApiClient,
}

impl FetchMatchHistoryWorker {
    pub const fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskHandler for FetchMatchHistoryWorker {
    async fn handle(&self, payload: Payload) -> Result<Payload, BoxError> {
        let job = FetchMatchHistoryJob::from_payload(payload)?;
        debug!(player_id = %job.player_id, region = %job.region, count = job.count, "Fetching match history");

        let match_ids: Vec<String> = self.client.get_json(&job.path()).await?;
        info!(
            player_id = %job.player_id,
            matches = match_ids.len(),
            "Fetched match history"
        );

        let mut result = Payload::new();
        result.insert("player_id".to_string(), job.player_id.into());
        result.insert("region".to_string(), job.region.into());
        result.insert("match_ids".to_string(), match_ids.into());
        Ok(result)
    }
}

/// Produces scores for a batch of players.
#[async_trait]
pub trait PlayerScorer: Send + Sync {
    async fn score(&self, player_ids: &[String], force: bool) -> Result<Payload, BoxError>;
}

/// Scorer used when no analysis backend is configured: logs the request and
/// scores nobody.
pub struct NoopScorer;

#[async_trait]
impl PlayerScorer for NoopScorer {
    async fn score(&self, player_ids: &[String], force: bool) -> Result<Payload, BoxError> {
        info!(players = player_ids.len(), force, "No scorer configured, skipping analysis");
        Ok(Payload::new())
    }
}

/// Delegates `analyze_players` tasks to a [`PlayerScorer`].
pub struct AnalyzePlayersWorker {
    scorer: Arc<dyn PlayerScorer>,
}

impl AnalyzePlayersWorker {
    pub fn new(scorer: Arc<dyn PlayerScorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl TaskHandler for AnalyzePlayersWorker {
    async fn handle(&self, payload: Payload) -> Result<Payload, BoxError> {
        let job = AnalyzePlayersJob::from_payload(payload)?;
        if job.player_ids.is_empty() {
            return Err("analyze_players needs at least one player id".into());
        }

        let scores = self.scorer.score(&job.player_ids, job.force).await?;

        let mut result = Payload::new();
        result.insert("analyzed".to_string(), job.player_ids.len().into());
        result.insert("scores".to_string(), Value::Object(scores));
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct LengthScorer;

    #[async_trait]
    impl PlayerScorer for LengthScorer {
        async fn score(&self, player_ids: &[String], _force: bool) -> Result<Payload, BoxError> {
            Ok(player_ids
                .iter()
                .map(|id| (id.clone(), Value::from(id.len())))
                .collect())
        }
    }

    fn analyze_payload(ids: &[&str]) -> Payload {
        AnalyzePlayersJob {
            player_ids: ids.iter().map(ToString::to_string).collect(),
            force: false,
        }
        .into_payload()
        .unwrap()
    }

    #[tokio::test]
    async fn test_analyze_delegates_to_scorer() {
        let worker = AnalyzePlayersWorker::new(Arc::new(LengthScorer));
        let result = worker.handle(analyze_payload(&["abc", "de"])).await.unwrap();
        assert_eq!(result["analyzed"], 2);
        assert_eq!(result["scores"]["abc"], 3);
    }

    #[tokio::test]
    async fn test_noop_scorer_returns_no_scores() {
        let worker = AnalyzePlayersWorker::new(Arc::new(NoopScorer));
        let result = worker.handle(analyze_payload(&["abc"])).await.unwrap();
        assert!(result["scores"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty_batch() {
        let worker = AnalyzePlayersWorker::new(Arc::new(NoopScorer));
        assert!(worker.handle(analyze_payload(&[])).await.is_err());
        assert!(worker.handle(Payload::new()).await.is_err());
    }
}

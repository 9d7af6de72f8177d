//! Player analysis job.

use serde::{Deserialize, Serialize};

use super::TaskJob;

/// Score a batch of players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzePlayersJob {
    pub player_ids: Vec<String>,

    /// Recompute even when a fresh score exists.
    #[serde(default)]
    pub force: bool,
}

impl TaskJob for AnalyzePlayersJob {
    const TASK_TYPE: &'static str = "analyze_players";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let job = AnalyzePlayersJob {
            player_ids: vec!["a".to_string(), "b".to_string()],
            force: true,
        };
        let payload = job.clone().into_payload().unwrap();
        assert_eq!(payload["player_ids"][1], "b");
        assert_eq!(AnalyzePlayersJob::from_payload(payload).unwrap(), job);
    }
}

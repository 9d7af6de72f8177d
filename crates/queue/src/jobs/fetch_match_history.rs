//! Match history fetch job.

use serde::{Deserialize, Serialize};

use super::TaskJob;

const fn default_count() -> u32 {
    20
}

/// Fetch the most recent matches of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMatchHistoryJob {
    /// Provider-side player identifier.
    pub player_id: String,

    /// Routing region, e.g. `euw1`.
    pub region: String,

    /// Number of matches to request.
    #[serde(default = "default_count")]
    pub count: u32,
}

impl FetchMatchHistoryJob {
    /// Create a job requesting the default number of matches.
    #[must_use]
    pub fn new(player_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            region: region.into(),
            count: default_count(),
        }
    }

    /// API path for this request.
    #[must_use]
    pub fn path(&self) -> String {
        format!(
            "/match/v5/matches/by-player/{}/{}/ids?count={}",
            self.region, self.player_id, self.count
        )
    }
}

impl TaskJob for FetchMatchHistoryJob {
    const TASK_TYPE: &'static str = "fetch_match_history";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::Payload;

    #[test]
    fn test_count_defaults() {
        let mut payload = Payload::new();
        payload.insert("player_id".to_string(), "abc".into());
        payload.insert("region".to_string(), "euw1".into());

        let job = FetchMatchHistoryJob::from_payload(payload).unwrap();
        assert_eq!(job, FetchMatchHistoryJob::new("abc", "euw1"));
        assert_eq!(job.count, 20);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let mut payload = Payload::new();
        payload.insert("player_id".to_string(), "abc".into());
        let err = FetchMatchHistoryJob::from_payload(payload).unwrap_err();
        assert!(err.to_string().contains("fetch_match_history"));
    }

    #[test]
    fn test_path() {
        let job = FetchMatchHistoryJob {
            count: 5,
            ..FetchMatchHistoryJob::new("p1", "na1")
        };
        assert_eq!(job.path(), "/match/v5/matches/by-player/na1/p1/ids?count=5");
    }
}

//! Typed job payloads.
//!
//! Handlers receive an untyped [`Payload`]; each job type here parses it
//! into a struct at the dispatch boundary.

#![allow(missing_docs)]

mod analyze_players;
mod cleanup;
mod fetch_match_history;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::task::Payload;

pub use analyze_players::AnalyzePlayersJob;
pub use cleanup::CleanupCompletedTasksJob;
pub use fetch_match_history::FetchMatchHistoryJob;

/// A payload that does not match its job type.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid {task_type} payload: {source}")]
    InvalidPayload {
        task_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{task_type} payload must be a JSON object")]
    NotAnObject { task_type: &'static str },
}

/// A job with a fixed task type and a JSON object payload.
pub trait TaskJob: Serialize + DeserializeOwned {
    /// Task type the handler is registered under.
    const TASK_TYPE: &'static str;

    /// Encode as a task payload.
    fn into_payload(self) -> Result<Payload, JobError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(JobError::NotAnObject {
                task_type: Self::TASK_TYPE,
            }),
            Err(source) => Err(JobError::InvalidPayload {
                task_type: Self::TASK_TYPE,
                source,
            }),
        }
    }

    /// Decode from a task payload.
    fn from_payload(payload: Payload) -> Result<Self, JobError> {
        serde_json::from_value(serde_json::Value::Object(payload)).map_err(|source| {
            JobError::InvalidPayload {
                task_type: Self::TASK_TYPE,
                source,
            }
        })
    }
}

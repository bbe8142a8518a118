use orrery_session::SessionError;
use thiserror::Error;

use crate::infrastructure::model::ModelError;

/// Failures that escape the loop. Tool failures never do; they are
/// captured per call in the batch records.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Backend(#[from] ModelError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Backend(err) => err.user_message(),
            AgentError::Session(_) => {
                "Something went wrong while handling this request. Please try again.".to_string()
            }
        }
    }
}

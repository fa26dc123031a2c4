//! Error taxonomy shared by the engine, its collaborators and the HTTP layer.
//!
//! A pending score release is deliberately absent here: it is a regular
//! result state (see `session::ResultsView::Pending`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness constraint violated (answer pair, task id, entity id).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Errors raised by the retrieval / generation collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("could not decode upstream response: {0}")]
    Decode(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollaboratorError::Decode(err.to_string())
        } else {
            CollaboratorError::Http(err.to_string())
        }
    }
}

/// Engine-level error returned by every core operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed configuration or input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Operation not allowed in the session's current state.
    #[error("session state error: {0}")]
    SessionState(String),

    #[error("question {question_id} already answered in session {session_id}")]
    DuplicateAnswer { session_id: String, question_id: String },

    #[error("job {task_id} is {current}; transition to {requested} rejected")]
    JobTransition {
        task_id: String,
        current: String,
        requested: String,
    },

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        EngineError::SessionState(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound { entity, id: id.into() }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            other => EngineError::Store(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Validation(_) | EngineError::DuplicateAnswer { .. } => StatusCode::BAD_REQUEST,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::SessionState(_) | EngineError::JobTransition { .. } => StatusCode::CONFLICT,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(target: "skillcheck", error = %self, "Request failed");
        }
        let body = Json(ErrorBody { error: self.to_string(), code: status.as_u16() });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_engine_not_found() {
        let err: EngineError = StoreError::NotFound { entity: "session", id: "s1".into() }.into();
        assert!(matches!(err, EngineError::NotFound { entity: "session", .. }));
    }

    #[test]
    fn store_conflict_stays_a_storage_error() {
        let err: EngineError = StoreError::Conflict("dup".into()).into();
        assert!(matches!(err, EngineError::Store(StoreError::Conflict(_))));
    }

    #[test]
    fn http_status_mapping() {
        let cases = [
            (EngineError::validation("x"), StatusCode::BAD_REQUEST),
            (EngineError::not_found("question", "q1"), StatusCode::NOT_FOUND),
            (EngineError::state("done"), StatusCode::CONFLICT),
            (
                EngineError::Collaborator(CollaboratorError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}

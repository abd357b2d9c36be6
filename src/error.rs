use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Course,
    Module,
    Lesson,
    User,
    Enrollment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Course => "course",
            Entity::Module => "module",
            Entity::Lesson => "lesson",
            Entity::User => "user",
            Entity::Enrollment => "enrollment",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The parent's version moved on since the client read it.
    StaleReorder,
    DuplicateSlug,
    /// Another sibling already holds the requested order value.
    DuplicateOrder,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictKind::StaleReorder => "reorder is based on a stale ordering",
            ConflictKind::DuplicateSlug => "slug already taken",
            ConflictKind::DuplicateOrder => "order already used by a sibling",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotEnrolled,
    Unpublished,
    RoleInsufficient,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::NotEnrolled => "not enrolled in this course",
            DenyReason::Unpublished => "lesson is not published",
            DenyReason::RoleInsufficient => "role insufficient",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmsError {
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("conflict: {0}")]
    Conflict(ConflictKind),
    #[error("forbidden: {0}")]
    Forbidden(DenyReason),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type LmsResult<T> = Result<T, LmsError>;

impl LmsError {
    pub fn kind(&self) -> &'static str {
        match self {
            LmsError::NotFound(_) => "not_found",
            LmsError::Conflict(_) => "conflict",
            LmsError::Forbidden(_) => "forbidden",
            LmsError::Validation(_) => "validation_error",
            LmsError::Storage(_) => "storage_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LmsError::NotFound(_) => StatusCode::NOT_FOUND,
            LmsError::Conflict(_) => StatusCode::CONFLICT,
            LmsError::Forbidden(_) => StatusCode::FORBIDDEN,
            LmsError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LmsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for LmsError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                match db.constraint() {
                    Some(c) if c.ends_with("_slug_key") => {
                        return LmsError::Conflict(ConflictKind::DuplicateSlug)
                    }
                    Some(c) if c.ends_with("_order_key") => {
                        return LmsError::Conflict(ConflictKind::DuplicateOrder)
                    }
                    Some("users_email_key") => {
                        return LmsError::Validation("email already registered".into())
                    }
                    _ => {}
                }
            }
        }
        LmsError::Storage(e.to_string())
    }
}

impl From<JsonRejection> for LmsError {
    fn from(rejection: JsonRejection) -> Self {
        LmsError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for LmsError {
    fn from(rejection: QueryRejection) -> Self {
        LmsError::Validation(rejection.body_text())
    }
}

impl IntoResponse for LmsError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            LmsError::Storage(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(serde_json::json!({ "error": self.kind(), "message": message }));
        (status, body).into_response()
    }
}

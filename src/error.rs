use std::borrow::Cow;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::models::{ApiResponse, ClaimRejection};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("cannot {attempted} {entity} while it is {current}")]
    InvalidTransition {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("conflict on {field}: {message}")]
    Conflict { field: String, message: String },

    #[error("claim rejected: {reason}")]
    ClaimRejected { reason: ClaimRejection },

    #[error("storage failure: {message}")]
    Storage { message: String },

    #[error("operation exceeded its deadline")]
    Timeout,
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        current: impl ToString,
        attempted: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        match fields.first() {
            Some((field, field_errors)) => {
                let message = field_errors
                    .first()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .unwrap_or_else(|| "invalid value".to_string());
                Self::validation(field.to_string(), message)
            }
            None => Self::validation("payload", errors.to_string()),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code() == Some(Cow::Borrowed("23505")) => {
                let field = match db_err.constraint() {
                    Some("business_locations_external_place_id_key") => "external_place_id",
                    Some("businesses_registration_id_key") => "registration_id",
                    Some("business_locations_single_primary") => "is_primary",
                    Some(other) => other,
                    None => "unique",
                };
                Self::conflict(field, db_err.message().to_string())
            }
            sqlx::Error::Database(db_err) if db_err.code() == Some(Cow::Borrowed("23514")) => {
                Self::validation(
                    check_constraint_field(db_err.constraint()),
                    db_err.message().to_string(),
                )
            }
            _ => Self::storage(err.to_string()),
        }
    }
}

/// Names the request field a schema CHECK constraint guards.
fn check_constraint_field(constraint: Option<&str>) -> &str {
    match constraint {
        Some("business_registration_requests_document_urls_check") => "document_urls",
        Some("business_locations_primary_is_active") => "is_primary",
        Some("business_promotions_window") => "ends_at",
        Some("business_promotions_claim_cap") => "max_claims",
        Some("business_promotions_discount_percent_check") => "discount_percent",
        Some("business_promotions_reward_points_check") => "reward_points",
        Some("business_promotions_max_claims_check") => "max_claims",
        Some("business_promotions_per_user_limit_check") => "per_user_limit",
        Some(other) => other,
        None => "payload",
    }
}

impl From<sqlx::migrate::MigrateError> for ServiceError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::storage(err.to_string())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } | Self::Conflict { .. } | Self::ClaimRejected { .. } => {
                StatusCode::CONFLICT
            }
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            // Storage details stay in the logs.
            Self::Storage { .. } => "Internal storage error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Payload {
        #[validate(length(min = 3))]
        name: String,
    }

    #[test]
    fn validation_errors_name_the_offending_field() {
        let err: ServiceError = Payload { name: "x".into() }.validate().unwrap_err().into();
        match err {
            ServiceError::Validation { field, .. } => assert_eq!(field, "name"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn check_violations_name_the_guarded_field() {
        assert_eq!(
            check_constraint_field(Some("business_promotions_discount_percent_check")),
            "discount_percent"
        );
        assert_eq!(check_constraint_field(Some("business_promotions_window")), "ends_at");
        assert_eq!(check_constraint_field(None), "payload");
    }

    #[test]
    fn kinds_map_to_distinct_status_codes() {
        let missing = ServiceError::not_found("location", Uuid::nil());
        let malformed = ServiceError::validation("ends_at", "must be after starts_at");
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::storage("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::ClaimRejected {
                reason: ClaimRejection::Exhausted
            }
            .to_string(),
            "claim rejected: exhausted"
        );
    }
}

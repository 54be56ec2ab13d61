use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Display;

use crate::engine::error::EligibilityError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// RPC status names carried in the `code` field of error bodies.
pub mod codes {
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const FAILED_PRECONDITION: &str = "FAILED_PRECONDITION";
    pub const UNIMPLEMENTED: &str = "UNIMPLEMENTED";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const INTERNAL: &str = "INTERNAL";
    pub const UNKNOWN: &str = "UNKNOWN";
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Map<String, Value>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_ARGUMENT, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::UNKNOWN,
            error.to_string(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            code: self.code,
            details: self.details,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    details: Map<String, Value>,
}

impl From<EligibilityError> for AppError {
    fn from(value: EligibilityError) -> Self {
        use EligibilityError as E;

        let (status, code) = match &value {
            E::Validation { .. } | E::OrganizationNotFound(_) => {
                (StatusCode::BAD_REQUEST, codes::INVALID_ARGUMENT)
            }
            E::Match { .. }
            | E::MatchMultiple { .. }
            | E::MemberSearch { .. }
            | E::GetMatch(_)
            | E::IdentityMatch(_)
            | E::NoDobMatch(_)
            | E::ClientSpecificMatch { .. } => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
            E::ClientSpecificConfiguration(_) => (StatusCode::NOT_IMPLEMENTED, codes::UNIMPLEMENTED),
            E::UpstreamClientSpecific { .. } => (StatusCode::SERVICE_UNAVAILABLE, codes::UNAVAILABLE),
            E::CreateVerification(_) | E::DeactivateVerification(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL)
            }
            E::RecordAlreadyClaimed(_) => (StatusCode::CONFLICT, codes::ALREADY_EXISTS),
            E::ForbiddenInProduction { .. } => {
                (StatusCode::PRECONDITION_FAILED, codes::FAILED_PRECONDITION)
            }
            E::Inconsistent(_) | E::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, codes::UNKNOWN),
        };

        let mut error = AppError::new(status, code, value.to_string());
        if let Some(method) = value.method() {
            error = error.with_detail("method", method.as_str());
        }
        if let E::Validation { fields, .. } = &value {
            error = error.with_detail("providedFields", fields.join(","));
        }
        error
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::internal(value)
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found("resource not found"),
            _ => AppError::internal(value),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::bad_request(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::EligibilityMethod;

    #[test]
    fn eligibility_errors_map_to_rpc_statuses() {
        let cases = [
            (
                EligibilityError::not_found(EligibilityMethod::Standard),
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND,
            ),
            (
                EligibilityError::multiple(EligibilityMethod::Alternate),
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND,
            ),
            (
                EligibilityError::OrganizationNotFound(4),
                StatusCode::BAD_REQUEST,
                codes::INVALID_ARGUMENT,
            ),
            (
                EligibilityError::ClientSpecificConfiguration("none".into()),
                StatusCode::NOT_IMPLEMENTED,
                codes::UNIMPLEMENTED,
            ),
            (
                EligibilityError::UpstreamClientSpecific {
                    implementation: "OPTUM".into(),
                    cause: "503".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                codes::UNAVAILABLE,
            ),
            (
                EligibilityError::RecordAlreadyClaimed("claimed".into()),
                StatusCode::CONFLICT,
                codes::ALREADY_EXISTS,
            ),
            (
                EligibilityError::ForbiddenInProduction {
                    method: EligibilityMethod::CreateTestMemberRecords,
                },
                StatusCode::PRECONDITION_FAILED,
                codes::FAILED_PRECONDITION,
            ),
            (
                EligibilityError::CreateVerification("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
            ),
        ];
        for (error, status, code) in cases {
            let mapped = AppError::from(error);
            assert_eq!((mapped.status(), mapped.code()), (status, code));
        }
    }

    #[test]
    fn validation_details_list_provided_fields() {
        let error = AppError::from(EligibilityError::validation(
            Some(EligibilityMethod::Alternate),
            "Missing first_name",
            &["first_name", "last_name"],
        ));
        assert_eq!(error.details.get("method"), Some(&Value::from("alternate")));
        assert_eq!(
            error.details.get("providedFields"),
            Some(&Value::from("first_name,last_name"))
        );
    }
}

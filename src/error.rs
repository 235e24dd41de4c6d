use axum::{
    http::{StatusCode, Uri},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::util::enum_label;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(Uri),

    #[error("No resource found")]
    NoResource,

    #[error("{0}")]
    PasswordHashError(#[from] password_hash::Error),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    JWTError(#[from] jsonwebtoken::errors::Error),

    #[error("{0} must unique")]
    MustUniqueError(String),

    #[error("{0}")]
    Unauthorized(UnauthorizedType),

    #[error("You have no permission to access this resource")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("This offer is no longer valid")]
    OfferExpired,

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BSONDeError(#[from] bson::de::Error),

    #[error("{0}")]
    MailError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UnauthorizedType {
    #[error("Wrong email or password")]
    WrongEmailOrPassword,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Wrong Password")]
    WrongPassword,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
    pub r#type: String,
    pub message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let r#type = err.to_string_variant();

        // internal failures don't leak driver details to clients
        let message = if err.status_code().is_server_error() {
            "Internal server error".to_string()
        } else {
            err.to_string()
        };

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            _ => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(..) | Self::MustUniqueError(..) | Self::InvalidInput(..) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(..) | Self::NoResource => StatusCode::NOT_FOUND,
            Self::Conflict(..) | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::OfferExpired => StatusCode::GONE,
            Self::PasswordHashError(..)
            | Self::DatabaseError(..)
            | Self::JWTError(..)
            | Self::BSONSerError(..)
            | Self::BSONDeError(..)
            | Self::MailError(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Statuses are named by their serialized form, as clients see them.
    pub fn invalid_transition(
        entity: &'static str,
        from: impl Serialize,
        to: impl Serialize,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: enum_label(&from),
            to: enum_label(&to),
        }
    }

    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
            ($id:ident {..}) => {
                Self::$id { .. }
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            ValidationError(..),
            InvalidInput(..),
            NotFound(..),
            NoResource!,
            PasswordHashError(..),
            DatabaseError(..),
            JWTError(..),
            MustUniqueError(..),
            Unauthorized(..),
            Forbidden!,
            Conflict(..),
            InvalidTransition {..},
            OfferExpired!,
            BSONSerError(..),
            BSONDeError(..),
            MailError(..)
        }
        .to_string()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("error: {:?}", self);
        } else {
            tracing::debug!("rejected request: {}", self);
        }

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NoResource
    }
}

impl From<axum::extract::rejection::JsonRejection> for Error {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        Self::InvalidInput(value.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for Error {
    fn from(value: axum::extract::rejection::QueryRejection) -> Self {
        Self::InvalidInput(value.body_text())
    }
}

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(it)) => it.code == DUPLICATE_KEY,
        ErrorKind::Command(it) => it.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use validator::{ValidationError, ValidationErrors};

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Unauthorized(UnauthorizedType::InvalidAccessToken).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NoResource.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::MustUniqueError("email".to_string()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::Conflict("order already has an offer".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(Error::OfferExpired.status_code(), StatusCode::GONE);
        assert_eq!(
            Error::MailError("smtp down".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_transition_message() {
        #[derive(Serialize)]
        #[serde(rename_all = "snake_case")]
        enum Status {
            InProgress,
            Pending,
        }

        let err = Error::invalid_transition("delivery", Status::Pending, Status::InProgress);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "delivery cannot move from pending to in_progress");
        assert_eq!(err.to_string_variant(), "InvalidTransition");
    }

    #[test]
    fn test_error_json_carries_validation_details() {
        let mut errors = ValidationErrors::new();
        errors.add("email", ValidationError::new("email"));

        let json = ErrorJson::from(Error::ValidationError(errors));
        assert_eq!(json.r#type, "ValidationError");
        assert!(json.errors.unwrap().get("email").is_some());
    }

    #[test]
    fn test_error_json_hides_internal_details() {
        let json = ErrorJson::from(Error::MailError("api key rejected".to_string()));
        assert_eq!(json.r#type, "MailError");
        assert_eq!(json.message, "Internal server error");
        assert!(json.errors.is_none());
    }
}

//! Error handler for ldapgate.

use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::allocator::RangeExhausted;
use crate::ldap::DirectoryError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error(transparent)]
    Form(#[from] FormRejection),

    #[error(transparent)]
    Query(#[from] QueryRejection),

    #[error("username `{0}` is reserved")]
    ReservedName(String),

    #[error("{0}")]
    Conflict(String),

    #[error("malformed directory entry `{dn}`: {reason}")]
    MalformedEntry { dn: String, reason: String },

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("account is not allowed to provision users")]
    Forbidden,
}

impl From<RangeExhausted> for ServerError {
    fn from(err: RangeExhausted) -> Self {
        ServerError::Conflict(err.to_string())
    }
}

impl ServerError {
    pub fn malformed(dn: &str, reason: impl Into<String>) -> Self {
        ServerError::MalformedEntry {
            dn: dn.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.to_string()),
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Json(err) => response.details(&err.body_text()),
            ServerError::Form(err) => response.details(&err.body_text()),
            ServerError::Query(err) => response.details(&err.body_text()),

            ServerError::ReservedName(_) | ServerError::Conflict(_) => response
                .title("Request conflicts with the directory state.")
                .status(StatusCode::CONFLICT),

            ServerError::Unauthorized => {
                let response = response
                    .title("Missing or invalid 'Authorization' header.")
                    .status(StatusCode::UNAUTHORIZED)
                    .into_response()
                    .map(|mut res| {
                        res.headers_mut().insert(
                            header::WWW_AUTHENTICATE,
                            header::HeaderValue::from_static(
                                r#"Basic realm="ldapgate""#,
                            ),
                        );
                        res
                    });
                return response.unwrap_or_else(|_| internal_server_error());
            },

            ServerError::Forbidden => response
                .title("Insufficient permissions.")
                .status(StatusCode::FORBIDDEN),

            ServerError::MalformedEntry { dn, reason } => {
                tracing::error!(%dn, %reason, "directory returned malformed entry");
                ResponseError::default().details(&self.to_string())
            },

            ServerError::Directory(err) => {
                tracing::error!(error = %err, "directory operation failed");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::ReservedName("root".into()), StatusCode::CONFLICT),
            (ServerError::Conflict("taken".into()), StatusCode::CONFLICT),
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ServerError::Forbidden, StatusCode::FORBIDDEN),
            (
                ServerError::malformed("cn=x", "missing uid"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServerError::Directory(DirectoryError::InvalidCredentials),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_range_exhausted_is_conflict() {
        let err: ServerError = RangeExhausted { min: 1, max: 2 }.into();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[test]
    fn test_unauthorized_challenges() {
        let res = ServerError::Unauthorized.into_response();
        assert!(res.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}

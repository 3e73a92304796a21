//! HTTP surface.
pub mod metrics;
pub mod status;
pub mod users;

use axum::extract::{FromRequest, Request};
use axum::http::header;
use axum::{Form, Json};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ServerError;

/// Body decoded from JSON or an HTML form, then validated.
///
/// JSON is picked on an `application/json` content type, anything else is
/// read as `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

fn is_json(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .is_some_and(|essence| {
            essence.eq_ignore_ascii_case("application/json")
                || essence.ends_with("+json")
        })
}

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = if is_json(&req) {
            let Json(value) = Json::<T>::from_request(req, state).await?;
            value
        } else {
            let Form(value) = Form::<T>::from_request(req, state).await?;
            value
        };

        value.validate()?;
        Ok(Valid(value))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use axum::routing::post;
    use serde::Deserialize;

    use super::*;
    use crate::config::Configuration;
    use crate::ldap::Directory;
    use crate::ldap::memory::MemoryDirectory;
    use crate::mail::Notifier;
    use crate::mail::testing::RecordingNotifier;
    use crate::user::{Settings, UserService};
    use crate::{AppState, make_request};

    const CONFIG: &str = r#"
name: ldapgate-test
base_domain: example.com
home: /home/{domain}/{username}
admin:
  name: Server Helpdesk
  email: helpdesk@example.com
admins:
  mari: example.com
"#;

    /// State over an in-memory directory where `mari` (password
    /// `hunter22`, mailbox `mari@example.com`) is an admin and `bob` (same
    /// password) is not.
    pub fn state(
        directory: Arc<MemoryDirectory>,
        notifier: Arc<RecordingNotifier>,
    ) -> AppState {
        let config: Configuration =
            serde_yaml::from_str(CONFIG).expect("valid test config");

        directory.insert(
            "dc=example,dc=com",
            &[("objectClass", &["domain"]), ("description", &["Example"])],
        );
        let mari =
            directory.insert_account("example.com", "Mari Maasikas", "mari", 2000);
        directory.set_account_password(&mari, "hunter22");
        directory.push(&mari, "mail", "mari@example.com");
        let bob = directory.insert_account("example.com", "Bob Smith", "bob", 2001);
        directory.set_account_password(&bob, "hunter22");

        let users = UserService::new(
            directory as Arc<dyn Directory>,
            Some(notifier as Arc<dyn Notifier>),
            Settings::from(&config),
        );

        AppState {
            config: Arc::new(config),
            users,
            metrics: None,
        }
    }

    #[derive(Debug, Deserialize, Validate)]
    struct Echo {
        #[validate(length(min = 2))]
        name: String,
    }

    async fn echo(Valid(body): Valid<Echo>) -> String {
        body.name
    }

    async fn call(content_type: &str, body: &str) -> StatusCode {
        let app = Router::new().route("/", post(echo));
        make_request(
            app,
            Method::POST,
            "/",
            &[(header::CONTENT_TYPE, content_type)],
            Body::from(body.to_owned()),
        )
        .await
        .status()
    }

    #[tokio::test]
    async fn test_valid_accepts_json_and_form() {
        assert_eq!(
            call("application/json", r#"{"name":"ann"}"#).await,
            StatusCode::OK
        );
        assert_eq!(
            call("application/json; charset=utf-8", r#"{"name":"ann"}"#).await,
            StatusCode::OK
        );
        assert_eq!(
            call("application/x-www-form-urlencoded", "name=ann").await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_valid_rejects() {
        assert_eq!(
            call("application/json", r#"{"name":"a"}"#).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call("application/json", "{").await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call("application/x-www-form-urlencoded", "other=ann").await,
            StatusCode::BAD_REQUEST
        );
    }
}

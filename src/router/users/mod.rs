//! Users-related HTTP API.
mod create;
mod list;

use axum::extract::{Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Router, middleware};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};

const BASIC: &str = "Basic ";

/// Account that authenticated the request.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester(pub String);

/// `?domain=` selecting the subtree to work on.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct DomainQuery {
    #[validate(custom(
        function = "crate::user::validate_domain",
        message = "Domain must be a lowercase DNS name."
    ))]
    pub domain: Option<String>,
}

impl DomainQuery {
    /// Requested domain, or the base domain.
    fn resolve(self, state: &AppState) -> Result<String> {
        self.validate()?;
        Ok(self
            .domain
            .unwrap_or_else(|| state.users.settings().base_domain.clone()))
    }
}

/// Decode `Authorization: Basic <base64(username:password)>`.
fn credentials(req: &Request) -> Option<(String, String)> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix(BASIC)?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}

/// Custom middleware for authentification.
async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: middleware::Next,
) -> Result<Response> {
    let Some((username, password)) = credentials(&req) else {
        return Err(ServerError::Unauthorized);
    };

    state.users.authorize(&username, &password).await?;

    req.extensions_mut().insert(Requester(username));
    Ok(next.run(req).await)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /users` goes to `list`.
        // `POST /users` goes to `create`. Authorization required.
        .route(
            "/users",
            get(list::handler).merge(
                post(create::handler)
                    .route_layer(middleware::from_fn_with_state(state, auth)),
            ),
        )
}

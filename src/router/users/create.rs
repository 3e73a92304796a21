use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use super::{DomainQuery, Requester};
use crate::AppState;
use crate::error::Result;
use crate::router::Valid;
use crate::user::{CreatedUser, ProvisionRequest};

/// Handler to create user.
pub async fn handler(
    State(state): State<AppState>,
    Extension(Requester(requester)): Extension<Requester>,
    query: std::result::Result<Query<DomainQuery>, QueryRejection>,
    Valid(mut body): Valid<ProvisionRequest>,
) -> Result<(StatusCode, Json<CreatedUser>)> {
    let Query(query) = query?;
    body.domain = query.resolve(&state)?;

    let user = state.users.create(body).await?;

    tracing::info!(
        %requester,
        username = %user.username,
        domain = %user.domain,
        uid = user.uid,
        "account provisioned"
    );

    Ok((StatusCode::CREATED, Json(user)))
}

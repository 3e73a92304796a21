use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};

use super::DomainQuery;
use crate::AppState;
use crate::error::Result;
use crate::user::UserRecord;

/// Every account of the domain, keyed by DN.
pub async fn handler(
    State(state): State<AppState>,
    query: std::result::Result<Query<DomainQuery>, QueryRejection>,
) -> Result<Json<BTreeMap<String, UserRecord>>> {
    let Query(query) = query?;
    let domain = query.resolve(&state)?;

    Ok(Json(state.users.list(&domain).await?))
}

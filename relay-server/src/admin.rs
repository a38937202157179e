use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use relay_core::models::User;
use relay_core::schema::users;
use relay_shared::{AdminError, RelayError};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UserLookupQuery {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    pubkey: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserLookupResponse {
    balance: i64,
}

impl From<User> for UserLookupResponse {
    fn from(user: User) -> Self {
        Self { balance: user.balance }
    }
}

/// `GET /user?token=<apiKey>&pubkey=<hex>`: 403 if the admin API key is
/// unset or `token` is absent/mismatched, 400 if `pubkey` is missing or
/// isn't valid hex, 404 if the user is unknown, else `200 {"balance": N}`.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserLookupQuery>,
) -> Result<Json<UserLookupResponse>, AdminError> {
    let Some(configured_key) = state.config.admin_api_key.as_deref() else {
        return Err(AdminError::Forbidden);
    };
    let Some(token) = query.token.as_deref() else {
        return Err(AdminError::Forbidden);
    };
    if token != configured_key {
        return Err(AdminError::Forbidden);
    }
    let Some(pubkey) = query.pubkey.filter(|p| !p.is_empty()) else {
        return Err(AdminError::BadRequest("pubkey must not be empty".to_string()));
    };
    let pubkey_bytes =
        hex::decode(&pubkey).map_err(|_| AdminError::BadRequest("pubkey must be valid hex".to_string()))?;

    let mut conn = state.db.get().map_err(RelayError::from).map_err(AdminError::from)?;
    let user = users::table
        .find(pubkey_bytes)
        .first::<User>(&mut conn)
        .optional()
        .map_err(RelayError::from)
        .map_err(AdminError::from)?;

    match user {
        Some(user) => Ok(Json(user.into())),
        None => Err(AdminError::NotFound),
    }
}

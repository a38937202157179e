use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::users;

/// A row of the `users` table. `pubkey` is stored as the raw public-key
/// bytes, not its hex rendering — callers encode/decode hex at the
/// repository boundary. `balance` is an exact integer column (millisatoshi
/// scale) — never floating-point.
#[derive(Debug, Clone, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(primary_key(pubkey))]
pub struct User {
    pub pubkey: Vec<u8>,
    pub is_admitted: bool,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tos_accepted_at: Option<DateTime<Utc>>,
}

/// Row to insert or upsert. `pubkey`, `balance`, and `created_at` are
/// insert-only columns — an upsert conflict merges every other column.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub pubkey: Vec<u8>,
    pub is_admitted: bool,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tos_accepted_at: Option<DateTime<Utc>>,
}

/// The subset of columns an upsert conflict is allowed to overwrite.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserConflictUpdate {
    pub is_admitted: bool,
    pub updated_at: DateTime<Utc>,
    pub tos_accepted_at: Option<DateTime<Utc>>,
}

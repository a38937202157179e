use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use relay_shared::clients::{DbPool, RedisClient, WebhookClient};
use relay_shared::{RelayError, RelayResult};

use crate::models::{NewUser, User, UserConflictUpdate};
use crate::schema::users;
use crate::settings::Webhooks;

/// The subset of [`UserRepository`] the admission pipeline depends on,
/// abstracted so pipeline tests can swap in an in-memory fake instead of a
/// live Postgres/Redis pair.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_pubkey(
        &self,
        pubkey: &str,
        webhooks: &Webhooks,
        fallback_topup_amount: i64,
    ) -> RelayResult<Option<User>>;

    fn get_balance_by_pubkey(&self, pubkey: &str) -> RelayResult<i64>;
    fn increment_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()>;
    fn decrement_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()>;

    async fn top_up_pubkey(&self, pubkey: &str, webhooks: &Webhooks, amount: i64) -> RelayResult<bool>;
}

/// Negative-lookup cache TTL: bounds how long an unknown pubkey stays
/// blocked in cache after one failed webhook lookup.
const NEGATIVE_CACHE_TTL_SECS: u64 = 60;

fn decode_pubkey(pubkey: &str) -> RelayResult<Vec<u8>> {
    hex::decode(pubkey).map_err(|_| RelayError::Internal(anyhow::anyhow!("pubkey is not valid hex: {pubkey}")))
}

#[derive(Debug, Serialize)]
struct PubkeyCheckRequest<'a> {
    pubkey: &'a str,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct PubkeyCheckResponse {
    #[allow(dead_code)]
    pubkey: String,
    is_admitted: bool,
    balance: i64,
}

#[derive(Debug, Serialize)]
struct TopUpRequest<'a> {
    pubkey: &'a str,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct TopUpResponse {
    success: bool,
}

/// Owns the pubkey → `{isAdmitted, balance, timestamps}` mapping, backed by
/// Postgres, a 60s negative Redis cache, and an optional pubkey-check/
/// top-up webhook. `pubkey` is hex at this type's boundary; it is decoded
/// to the binary column on the way into Postgres and re-encoded on the way
/// out.
pub struct UserRepository {
    db: DbPool,
    cache: RedisClient,
    webhook: WebhookClient,
}

impl UserRepository {
    pub fn new(db: DbPool, cache: RedisClient, webhook: WebhookClient) -> Self {
        Self { db, cache, webhook }
    }

    fn blocked_key(pubkey: &str) -> String {
        format!("{pubkey}:is-blocked")
    }

    /// `findByPubkey`: cache → datastore → webhook, in that order.
    pub async fn find_by_pubkey(
        &self,
        pubkey: &str,
        webhooks: &Webhooks,
        fallback_topup_amount: i64,
    ) -> RelayResult<Option<User>> {
        if self.cache.exists(&Self::blocked_key(pubkey)).await? {
            return Ok(None);
        }

        if let Some(user) = self.query_user(pubkey)? {
            return Ok(Some(user));
        }

        let Some(endpoint) = webhooks.endpoints.as_ref() else {
            return Ok(None);
        };
        if !webhooks.pubkey_checks {
            return Ok(None);
        }
        let Some(path) = endpoint.pubkey_check.as_deref() else {
            return Ok(None);
        };

        let request = PubkeyCheckRequest {
            pubkey,
            amount: fallback_topup_amount,
        };
        let response: PubkeyCheckResponse = self
            .webhook
            .post_json(&endpoint.base_url, path, &request)
            .await?;

        if !response.is_admitted {
            self.cache
                .set_ex(&Self::blocked_key(pubkey), "true", NEGATIVE_CACHE_TTL_SECS)
                .await?;
            return Ok(None);
        }

        let now = Utc::now();
        let new_user = NewUser {
            pubkey: decode_pubkey(pubkey)?,
            is_admitted: response.is_admitted,
            balance: response.balance,
            created_at: now,
            updated_at: now,
            tos_accepted_at: Some(now),
        };
        self.upsert(new_user)?;
        self.query_user(pubkey)
            .map(|u| u.expect("just upserted this row"))
    }

    fn query_user(&self, pubkey: &str) -> RelayResult<Option<User>> {
        let mut conn = self.db.get().map_err(RelayError::from)?;
        let user = users::table
            .find(decode_pubkey(pubkey)?)
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    /// Insert-on-conflict keyed by `pubkey`; on conflict, every column
    /// except `pubkey`, `balance`, and `created_at` is merged.
    pub fn upsert(&self, user: NewUser) -> RelayResult<usize> {
        let mut conn = self.db.get().map_err(RelayError::from)?;
        let update = UserConflictUpdate {
            is_admitted: user.is_admitted,
            updated_at: user.updated_at,
            tos_accepted_at: user.tos_accepted_at,
        };
        let rows = diesel::insert_into(users::table)
            .values(&user)
            .on_conflict(users::pubkey)
            .do_update()
            .set(&update)
            .execute(&mut conn)?;
        Ok(rows)
    }

    pub fn get_balance_by_pubkey(&self, pubkey: &str) -> RelayResult<i64> {
        Ok(self.query_user(pubkey)?.map(|u| u.balance).unwrap_or(0))
    }

    pub fn increment_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()> {
        self.adjust_balance(pubkey, amount)
    }

    pub fn decrement_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()> {
        self.adjust_balance(pubkey, -amount)
    }

    fn adjust_balance(&self, pubkey: &str, delta: i64) -> RelayResult<()> {
        let mut conn = self.db.get().map_err(RelayError::from)?;
        diesel::update(users::table.find(decode_pubkey(pubkey)?))
            .set((
                users::balance.eq(users::balance + delta),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    /// `topUpPubkey`: guarded by `webhooks.topUps` and `endpoints.topUps`;
    /// increments the balance on a successful response.
    pub async fn top_up_pubkey(
        &self,
        pubkey: &str,
        webhooks: &Webhooks,
        amount: i64,
    ) -> RelayResult<bool> {
        if !webhooks.top_ups {
            return Ok(false);
        }
        let Some(endpoint) = webhooks.endpoints.as_ref() else {
            return Ok(false);
        };
        let Some(path) = endpoint.top_ups.as_deref() else {
            return Ok(false);
        };

        let request = TopUpRequest { pubkey, amount };
        let response: TopUpResponse = self
            .webhook
            .post_json(&endpoint.base_url, path, &request)
            .await?;

        if response.success {
            self.increment_user_balance(pubkey, amount)?;
        }
        Ok(response.success)
    }
}

#[async_trait]
impl UserRepo for UserRepository {
    async fn find_by_pubkey(
        &self,
        pubkey: &str,
        webhooks: &Webhooks,
        fallback_topup_amount: i64,
    ) -> RelayResult<Option<User>> {
        UserRepository::find_by_pubkey(self, pubkey, webhooks, fallback_topup_amount).await
    }

    fn get_balance_by_pubkey(&self, pubkey: &str) -> RelayResult<i64> {
        UserRepository::get_balance_by_pubkey(self, pubkey)
    }

    fn increment_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()> {
        UserRepository::increment_user_balance(self, pubkey, amount)
    }

    fn decrement_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()> {
        UserRepository::decrement_user_balance(self, pubkey, amount)
    }

    async fn top_up_pubkey(&self, pubkey: &str, webhooks: &Webhooks, amount: i64) -> RelayResult<bool> {
        UserRepository::top_up_pubkey(self, pubkey, webhooks, amount).await
    }
}

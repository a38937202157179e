//! In-memory fakes used by pipeline tests so the admission pipeline can be
//! exercised without a live Postgres/Redis pair.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use relay_shared::RelayResult;

use crate::event::Event;
use crate::models::User;
use crate::repository::UserRepo;
use crate::settings::Webhooks;
use crate::webhook::{EventCheckResponse, EventWebhook};

#[derive(Default)]
pub struct InMemoryUserRepo {
    users: Mutex<HashMap<String, User>>,
    top_up_amount: Mutex<Option<i64>>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, pubkey: &str, is_admitted: bool, balance: i64) {
        let now = Utc::now();
        self.users.lock().unwrap().insert(
            pubkey.to_string(),
            User {
                pubkey: hex::decode(pubkey).expect("seed pubkey must be valid hex"),
                is_admitted,
                balance,
                created_at: now,
                updated_at: now,
                tos_accepted_at: None,
            },
        );
    }

    /// Configure the next [`UserRepo::top_up_pubkey`] call to succeed and
    /// credit `amount`, regardless of `webhooks` configuration. Passing
    /// `None` makes the next call return `false`.
    pub fn set_next_top_up(&self, amount: Option<i64>) {
        *self.top_up_amount.lock().unwrap() = amount;
    }
}

#[async_trait]
impl UserRepo for InMemoryUserRepo {
    async fn find_by_pubkey(
        &self,
        pubkey: &str,
        _webhooks: &Webhooks,
        _fallback_topup_amount: i64,
    ) -> RelayResult<Option<User>> {
        Ok(self.users.lock().unwrap().get(pubkey).cloned())
    }

    fn get_balance_by_pubkey(&self, pubkey: &str) -> RelayResult<i64> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .get(pubkey)
            .map(|u| u.balance)
            .unwrap_or(0))
    }

    fn increment_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(pubkey) {
            user.balance += amount;
        }
        Ok(())
    }

    fn decrement_user_balance(&self, pubkey: &str, amount: i64) -> RelayResult<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(pubkey) {
            user.balance -= amount;
        }
        Ok(())
    }

    async fn top_up_pubkey(&self, pubkey: &str, _webhooks: &Webhooks, _amount: i64) -> RelayResult<bool> {
        let configured = self.top_up_amount.lock().unwrap().take();
        match configured {
            Some(amount) => {
                self.increment_user_balance(pubkey, amount)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryEventWebhook {
    next_check: Mutex<Option<EventCheckResponse>>,
    callbacks_seen: Mutex<Vec<String>>,
}

impl InMemoryEventWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_next_check(&self, response: Option<EventCheckResponse>) {
        *self.next_check.lock().unwrap() = response;
    }

    pub fn callbacks_seen(&self) -> Vec<String> {
        self.callbacks_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventWebhook for InMemoryEventWebhook {
    async fn check_event(&self, _event: &Event, _webhooks: &Webhooks) -> RelayResult<Option<EventCheckResponse>> {
        let configured = self.next_check.lock().unwrap().take();
        Ok(configured.map(|r| EventCheckResponse {
            success: r.success,
            reason: r.reason,
        }))
    }

    async fn notify_event(&self, event: &Event, _webhooks: &Webhooks) -> RelayResult<()> {
        self.callbacks_seen.lock().unwrap().push(event.id.clone());
        Ok(())
    }
}

pub mod db;
pub mod http;
pub mod redis;

pub use db::{create_pool, DbPool};
pub use http::WebhookClient;
pub use redis::RedisClient;

pub mod clients;
pub mod errors;
pub mod middleware;
pub mod types;

pub use errors::{AdminError, RelayError, RelayResult};
pub use types::*;

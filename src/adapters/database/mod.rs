pub mod conversation_store;
pub mod delivery_store;
pub mod payload_store;
pub mod records;

pub use conversation_store::PgConversationStore;
pub use delivery_store::PgDeliveryStore;
pub use payload_store::PgPayloadStore;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

//! Postgres-backed storage for the worker.
//!
//! The service only ever speaks to one relational backend: the Queue
//! Protocol's claim semantics are specified directly against
//! `SELECT ... FOR UPDATE SKIP LOCKED`, so there is no meaningful
//! multi-backend abstraction to preserve from the application this service
//! was adapted from (which also supported SQLite for its own purposes). See
//! `DESIGN.md` for the dropped-capability note.

pub mod people;
pub mod photos;
pub mod queue;
mod schema;
pub mod tags;

pub use people::{Face, Person};
pub use photos::AiResults;
pub use queue::{QueueStats, WorkItem};
pub use tags::TagKind;

use anyhow::{Context, Result};
use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;
pub type PooledConn = r2d2::PooledConnection<PostgresConnectionManager<NoTls>>;

/// Shared handle to the Postgres connection pool.
///
/// Every blocking call through this handle is expected to run inside
/// `tokio::task::spawn_blocking` — the worker loop and HTTP handlers never
/// call into `postgres` directly on the async reactor thread.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let config = database_url
            .parse()
            .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .context("failed to build Postgres connection pool")?;
        Ok(Self { pool })
    }

    /// Create the contract tables if they don't already exist. Schema
    /// ownership otherwise belongs to the upstream ingester/web application;
    /// this is a convenience for local development and tests, not a
    /// migration system.
    pub fn initialize(&self) -> Result<()> {
        let mut conn = self.conn()?;
        conn.batch_execute(schema::SCHEMA)
            .context("failed to apply schema")?;
        Ok(())
    }

    pub fn conn(&self) -> Result<PooledConn> {
        self.pool.get().context("failed to check out a connection")
    }
}

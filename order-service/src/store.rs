use async_trait::async_trait;
use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, PoolError};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::Order;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::*;
use crate::schema::*;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),

    #[error("store operation exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("failed to build connection pool: {0}")]
    Connect(#[from] PoolError),

    #[error("connection pool error: {0}")]
    Pool(#[from] bb8::RunError<PoolError>),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Durable home of orders.
///
/// `get_by_id` reports an absent order as `Ok(None)` so callers can tell it
/// apart from a store that is failing.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates or fully replaces an order, items included, in one transaction.
    /// Calling it again with the same order leaves the same rows behind.
    async fn upsert(&self, order: &Order) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Order>, StoreError>;

    /// Ids of the `limit` most recently created orders, newest first.
    async fn list_recent_ids(&self, limit: i64) -> Result<Vec<String>, StoreError>;
}

/// Runs pending schema migrations over a short-lived blocking connection.
pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    Ok(())
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
    timeout: Duration,
}

impl PgOrderStore {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Builds the pool and proves the database answers before handing it out.
    pub async fn connect(database_url: &str, max_size: u32, timeout: Duration) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(timeout)
            .build(config)
            .await?;

        let store = Self::new(pool, timeout);
        store.ping().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.with_deadline(async {
            let mut conn = self.pool.get().await?;
            diesel::sql_query("SELECT 1").execute(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn with_deadline<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
        let rows = OrderRows::from(order);

        self.with_deadline(async {
            let mut conn = self.pool.get().await?;

            conn.transaction::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    diesel::insert_into(orders::table)
                        .values(&rows.order)
                        .on_conflict(orders::order_uid)
                        .do_update()
                        .set(&rows.order)
                        .execute(conn)
                        .await?;

                    diesel::insert_into(deliveries::table)
                        .values(&rows.delivery)
                        .on_conflict(deliveries::order_uid)
                        .do_update()
                        .set(&rows.delivery)
                        .execute(conn)
                        .await?;

                    diesel::insert_into(payments::table)
                        .values(&rows.payment)
                        .on_conflict(payments::order_uid)
                        .do_update()
                        .set(&rows.payment)
                        .execute(conn)
                        .await?;

                    // Items are replaced wholesale, never merged.
                    diesel::delete(order_items::table.filter(order_items::order_uid.eq(&rows.order.order_uid)))
                        .execute(conn)
                        .await?;

                    if !rows.items.is_empty() {
                        diesel::insert_into(order_items::table)
                            .values(&rows.items)
                            .execute(conn)
                            .await?;
                    }

                    Ok(())
                })
            })
            .await
        })
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let id = id.to_owned();

        self.with_deadline(async {
            let mut conn = self.pool.get().await?;

            // One snapshot for header and items so a concurrent upsert is
            // either fully visible or not at all.
            conn.build_transaction()
                .read_only()
                .repeatable_read()
                .run::<_, StoreError, _>(|conn| {
                    Box::pin(async move {
                        let header = orders::table
                            .inner_join(deliveries::table)
                            .inner_join(payments::table)
                            .filter(orders::order_uid.eq(&id))
                            .select((OrderRow::as_select(), DeliveryRow::as_select(), PaymentRow::as_select()))
                            .first::<(OrderRow, DeliveryRow, PaymentRow)>(conn)
                            .await
                            .optional()?;

                        let Some((order, delivery, payment)) = header else {
                            return Ok(None);
                        };

                        let items = order_items::table
                            .filter(order_items::order_uid.eq(&id))
                            .order(order_items::chrt_id.asc())
                            .select(ItemRow::as_select())
                            .load::<ItemRow>(conn)
                            .await?;

                        Ok(Some(Order::from(OrderRows { order, delivery, payment, items })))
                    })
                })
                .await
        })
        .await
    }

    async fn list_recent_ids(&self, limit: i64) -> Result<Vec<String>, StoreError> {
        if limit <= 0 {
            return Err(StoreError::InvalidLimit(limit));
        }

        self.with_deadline(async {
            let mut conn = self.pool.get().await?;
            let ids = orders::table
                .select(orders::order_uid)
                .order(orders::date_created.desc())
                .limit(limit)
                .load::<String>(&mut conn)
                .await?;
            Ok(ids)
        })
        .await
    }
}

/// Fetches up to `limit` of the newest orders for cache warm-up, newest first.
///
/// An id that fails to load (or has vanished since listing) is logged and
/// skipped; only a failure to list ids fails the batch.
pub async fn load_recent(store: &dyn OrderStore, limit: i64) -> Result<Vec<Order>, StoreError> {
    let ids = store.list_recent_ids(limit).await?;
    let mut orders = Vec::with_capacity(ids.len());

    for id in ids {
        match store.get_by_id(&id).await {
            Ok(Some(order)) => orders.push(order),
            Ok(None) => info!("Order {} disappeared during warm-up", id),
            Err(e) => warn!("Skipping order {} during warm-up: {}", id, e),
        }
    }

    Ok(orders)
}

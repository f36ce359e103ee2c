//! Fixtures and in-memory doubles for the store and broker seams.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::{Delivery, Item, Order, Payment};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::source::{InboundMessage, MessageSource, SourceError};
use crate::store::{OrderStore, StoreError};

pub fn sample_order(id: &str, chrt_ids: &[i64]) -> Order {
    Order {
        order_uid: id.to_string(),
        track_number: "WBILMTESTTRACK".to_string(),
        entry: "WBIL".to_string(),
        delivery: Delivery {
            name: "Test Testov".to_string(),
            phone: "+9720000000".to_string(),
            zip: "2639809".to_string(),
            city: "Kiryat Mozkin".to_string(),
            address: "Ploshad Mira 15".to_string(),
            region: "Kraiot".to_string(),
            email: "test@gmail.com".to_string(),
        },
        payment: Payment {
            transaction: id.to_string(),
            request_id: String::new(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1637907727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            custom_fee: 0,
        },
        items: chrt_ids
            .iter()
            .map(|&chrt_id| Item {
                chrt_id,
                track_number: "WBILMTESTTRACK".to_string(),
                price: 453,
                rid: format!("rid-{}", chrt_id),
                name: "Mascaras".to_string(),
                sale: 30,
                size: "0".to_string(),
                total_price: 317,
                nm_id: 2389212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            })
            .collect(),
        locale: "en".to_string(),
        internal_signature: String::new(),
        customer_id: "test".to_string(),
        delivery_service: "meest".to_string(),
        shardkey: "9".to_string(),
        sm_id: 99,
        date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
        oof_shard: "1".to_string(),
    }
}

/// Store double that keeps whole orders and can be told to fail.
#[derive(Default)]
pub struct MemoryStore {
    orders: Mutex<HashMap<String, Order>>,
    failing_upserts: AtomicUsize,
    failing_reads: Mutex<HashSet<String>>,
    broken_reads: Mutex<HashSet<String>>,
    upserts: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` upserts fail with a timeout.
    pub fn fail_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }

    /// Reads of `id` time out.
    pub fn fail_reads_for(&self, id: &str) {
        self.failing_reads.lock().unwrap().insert(id.to_string());
    }

    /// Reads of `id` fail with a database error.
    pub fn break_reads_for(&self, id: &str) {
        self.broken_reads.lock().unwrap().insert(id.to_string());
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> HashMap<String, Order> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn upsert(&self, order: &Order) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StoreError::Timeout(Duration::from_secs(5)));
        }

        let mut stored = order.clone();
        stored.items.sort_by_key(|item| item.chrt_id);
        self.orders.lock().unwrap().insert(order.order_uid.clone(), stored);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Order>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.lock().unwrap().contains(id) {
            return Err(StoreError::Timeout(Duration::from_secs(5)));
        }
        if self.broken_reads.lock().unwrap().contains(id) {
            return Err(StoreError::Database(diesel::result::Error::BrokenTransactionManager));
        }
        Ok(self.orders.lock().unwrap().get(id).cloned())
    }

    async fn list_recent_ids(&self, limit: i64) -> Result<Vec<String>, StoreError> {
        if limit <= 0 {
            return Err(StoreError::InvalidLimit(limit));
        }
        let mut orders: Vec<Order> = self.orders.lock().unwrap().values().cloned().collect();
        orders.sort_by(|a, b| b.date_created.cmp(&a.date_created));
        Ok(orders
            .into_iter()
            .take(limit as usize)
            .map(|order| order.order_uid)
            .collect())
    }
}

/// Broker double replaying a fixed partition log.
///
/// Once the log is exhausted it cancels `drained` and blocks, the way a real
/// consumer blocks on an idle topic.
pub struct ScriptedSource {
    log: Vec<InboundMessage>,
    position: usize,
    drained: CancellationToken,
    pub fetched: Vec<i64>,
    pub committed: Vec<i64>,
    pub rewound: Vec<i64>,
}

impl ScriptedSource {
    pub fn new(payloads: Vec<Vec<u8>>, drained: CancellationToken) -> Self {
        let log = payloads
            .into_iter()
            .enumerate()
            .map(|(offset, payload)| InboundMessage {
                topic: "orders".to_string(),
                partition: 0,
                offset: offset as i64,
                key: None,
                payload,
            })
            .collect();

        Self {
            log,
            position: 0,
            drained,
            fetched: Vec::new(),
            committed: Vec::new(),
            rewound: Vec::new(),
        }
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn fetch(&mut self) -> Result<InboundMessage, SourceError> {
        match self.log.get(self.position) {
            Some(message) => {
                self.position += 1;
                self.fetched.push(message.offset);
                Ok(message.clone())
            }
            None => {
                self.drained.cancel();
                std::future::pending().await
            }
        }
    }

    async fn commit(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        self.committed.push(message.offset);
        Ok(())
    }

    async fn rewind(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        self.rewound.push(message.offset);
        self.position = message.offset as usize;
        Ok(())
    }
}

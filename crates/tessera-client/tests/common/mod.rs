//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tessera_client::memory::{MemoryClient, users_table};
use tessera_client::{
    ExecutionContext, NetworkClient, QueryError, Session, Subscriber, Subscription, WorkerPool,
};
use tessera_types::{Row, Value};

/// A session over an in-memory store holding `rows` users with ids `0..rows`.
pub fn seeded_session(pool: &WorkerPool, rows: i64) -> (Arc<MemoryClient>, Session) {
    let client = Arc::new(MemoryClient::new(pool));
    client.create_table(users_table()).unwrap();
    for id in 0..rows {
        client
            .insert_row("users", vec![Value::BigInt(id), format!("user-{id}").into()])
            .unwrap();
    }
    let context = ExecutionContext::new(Arc::clone(&client) as Arc<dyn NetworkClient>, pool.clone());
    (client, Session::new(context))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Complete,
    Error(String),
}

/// Subscriber that records everything it receives.
#[derive(Default)]
pub struct Recorder {
    subscription: Mutex<Option<Subscription>>,
    ids: Mutex<Vec<i64>>,
    terminals: Mutex<Vec<Terminal>>,
}

impl Recorder {
    pub fn subscription(&self) -> Subscription {
        self.subscription
            .lock()
            .unwrap()
            .clone()
            .expect("on_subscribe was not called")
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription.lock().unwrap().is_some()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.ids.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> usize {
        self.ids.lock().unwrap().len()
    }

    pub fn terminals(&self) -> Vec<Terminal> {
        self.terminals.lock().unwrap().clone()
    }

    pub fn terminal(&self) -> Option<Terminal> {
        self.terminals.lock().unwrap().first().cloned()
    }
}

impl Subscriber for Recorder {
    fn on_subscribe(&self, subscription: Subscription) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }

    fn on_next(&self, row: Row) {
        let id = row.get(0).and_then(Value::as_i64).unwrap();
        self.ids.lock().unwrap().push(id);
    }

    fn on_error(&self, error: QueryError) {
        self.terminals
            .lock()
            .unwrap()
            .push(Terminal::Error(error.to_string()));
    }

    fn on_complete(&self) {
        self.terminals.lock().unwrap().push(Terminal::Complete);
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

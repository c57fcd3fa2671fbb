//! Demand-driven streaming demo.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tessera_client::{QueryError, Statement, Subscriber, Subscription};
use tessera_types::{Row, Value};

use super::{Demo, load_config};
use crate::table::print_results;

enum Event {
    Subscribed(Subscription),
    Row(i64),
    Complete,
    Failed(String),
}

/// Forwards every signal to the command thread.
struct Forwarder(Sender<Event>);

impl Forwarder {
    fn send(&self, event: Event) {
        // The command thread is gone once it has seen a terminal signal.
        let _ = self.0.send(event);
    }
}

impl Subscriber for Forwarder {
    fn on_subscribe(&self, subscription: Subscription) {
        self.send(Event::Subscribed(subscription));
    }

    fn on_next(&self, row: Row) {
        let id = row.get(0).and_then(Value::as_i64).unwrap_or(-1);
        self.send(Event::Row(id));
    }

    fn on_error(&self, error: QueryError) {
        self.send(Event::Failed(error.to_string()));
    }

    fn on_complete(&self) {
        self.send(Event::Complete);
    }
}

#[derive(Default)]
struct Batch {
    first: Option<i64>,
    last: Option<i64>,
    delivered: u64,
}

/// Seed `rows` users, stream them back, and signal each demand in turn.
pub fn run(
    project: &str,
    rows: u32,
    page_size: Option<u32>,
    requests: &[u64],
    latency_ms: u64,
) -> Result<()> {
    if requests.contains(&0) {
        bail!("Request sizes must be positive");
    }

    let config = load_config(project)?;
    let demo = Demo::new(&config)?;
    let wait = config.client.blocking_timeout();
    for id in 0..i64::from(rows) {
        demo.client
            .insert_row("users", vec![Value::BigInt(id), format!("user-{id}").into()])
            .context("Failed to seed users")?;
    }
    demo.client.set_latency(Duration::from_millis(latency_ms));

    let mut statement = Statement::new("SELECT * FROM users");
    if let Some(page_size) = page_size {
        statement = statement.with_page_size(page_size);
    }

    let stream = demo
        .pool
        .handle()
        .block_on(demo.session.stream(statement))
        .context("Failed to execute scan")?;

    let (tx, rx) = mpsc::channel();
    stream.subscribe(Arc::new(Forwarder(tx)));
    let subscription = match next_event(&rx, wait)? {
        Event::Subscribed(subscription) => subscription,
        _ => bail!("Stream did not signal its subscription first"),
    };

    let total = u64::from(rows);
    let mut requested = 0u64;
    let mut delivered = 0u64;
    let mut finished = None;
    let mut table = Vec::new();

    for &n in requests {
        requested = requested.saturating_add(n);
        subscription.request(n);

        let target = requested.min(total);
        let mut batch = Batch::default();
        while finished.is_none() && (delivered < target || target == total) {
            match next_event(&rx, wait)? {
                Event::Row(id) => {
                    batch.first.get_or_insert(id);
                    batch.last = Some(id);
                    batch.delivered += 1;
                    delivered += 1;
                }
                Event::Complete => finished = Some("complete".to_string()),
                Event::Failed(error) => finished = Some(format!("error: {error}")),
                Event::Subscribed(_) => {}
            }
        }

        table.push(vec![
            n.to_string(),
            batch.delivered.to_string(),
            delivered.to_string(),
            match (batch.first, batch.last) {
                (Some(first), Some(last)) => format!("{first}..={last}"),
                _ => "-".to_string(),
            },
        ]);
    }

    print_results(&["request", "delivered", "total", "ids"], &table);

    let stats = demo.client.stats();
    println!(
        "Status: {}",
        finished.as_deref().unwrap_or("waiting for demand")
    );
    println!(
        "Page round trips: {} ({} execute, {} fetch)",
        stats.page_round_trips(),
        stats.executes,
        stats.page_fetches
    );
    tracing::info!(delivered, requested, "stream demo finished");

    Ok(())
}

fn next_event(rx: &Receiver<Event>, wait: Duration) -> Result<Event> {
    rx.recv_timeout(wait)
        .with_context(|| format!("No signal from the stream within {wait:?}"))
}

//! Integration tests for demand-driven streaming over paged results.

mod common;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Recorder, Terminal, eventually, seeded_session};
use proptest::prelude::*;
use tessera_client::{NetworkError, QueryError, Statement, Subscriber, Subscription, WorkerPool};
use tessera_types::{Row, Value};

fn scan(page_size: u32) -> Statement {
    Statement::new("SELECT * FROM users").with_page_size(page_size)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_five_then_thirty_over_three_pages() {
    let pool = WorkerPool::current();
    let (client, session) = seeded_session(&pool, 25);
    let stream = session.stream(scan(10)).await.unwrap();
    let recorder = Arc::new(Recorder::default());
    stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    recorder.subscription().request(5);
    eventually(|| recorder.delivered() == 5).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(recorder.delivered(), 5);
    assert!(recorder.terminal().is_none());

    recorder.subscription().request(30);
    eventually(|| recorder.terminal().is_some()).await;

    assert_eq!(recorder.ids(), (0..25).collect::<Vec<_>>());
    assert_eq!(recorder.terminals(), vec![Terminal::Complete]);
    assert_eq!(client.stats().page_round_trips(), 3);
    assert_eq!(client.stats().page_fetches, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_requests_after_completion_deliver_nothing() {
    let pool = WorkerPool::current();
    let (_, session) = seeded_session(&pool, 12);
    let stream = session.stream(scan(5)).await.unwrap();
    let recorder = Arc::new(Recorder::default());
    stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    recorder.subscription().request(100);
    eventually(|| recorder.terminal().is_some()).await;
    recorder.subscription().request(10);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(recorder.delivered(), 12);
    assert_eq!(recorder.terminals(), vec![Terminal::Complete]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_subscriber_is_rejected() {
    let pool = WorkerPool::current();
    let (_, session) = seeded_session(&pool, 6);
    let stream = session.stream(scan(4)).await.unwrap();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    stream.subscribe(Arc::clone(&first) as Arc<dyn Subscriber>);
    first.subscription().request(2);
    stream.subscribe(Arc::clone(&second) as Arc<dyn Subscriber>);

    assert!(!second.has_subscription());
    assert!(matches!(second.terminal(), Some(Terminal::Error(m)) if m.contains("already")));

    first.subscription().request(10);
    eventually(|| first.terminal().is_some()).await;
    assert_eq!(first.ids(), (0..6).collect::<Vec<_>>());
    assert_eq!(first.terminals(), vec![Terminal::Complete]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_discards_in_flight_fetch() {
    let pool = WorkerPool::current();
    let (client, session) = seeded_session(&pool, 30);
    client.set_latency(Duration::from_millis(30));
    let stream = session.stream(scan(10)).await.unwrap();
    let recorder = Arc::new(Recorder::default());
    stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    recorder.subscription().request(15);
    assert_eq!(recorder.delivered(), 10);
    assert!(stream.cursor().is_fetching());

    recorder.subscription().cancel();
    recorder.subscription().cancel();
    eventually(|| !stream.cursor().is_fetching()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(recorder.delivered(), 10);
    assert_eq!(recorder.terminals(), vec![Terminal::Complete]);
    assert_eq!(stream.cursor().available_without_fetching(), 10);
}

#[derive(Debug, PartialEq)]
enum Signal {
    Next(i64),
    Complete,
    Error,
}

/// Subscriber that parks inside its first `on_next` until released.
struct Gate {
    subscription: Mutex<Option<Subscription>>,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    signals: Mutex<Vec<Signal>>,
}

impl Gate {
    fn signals(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.signals.lock().unwrap())
    }
}

impl Subscriber for Gate {
    fn on_subscribe(&self, subscription: Subscription) {
        *self.subscription.lock().unwrap() = Some(subscription);
    }

    fn on_next(&self, row: Row) {
        let id = row.get(0).and_then(Value::as_i64).unwrap();
        self.signals.lock().unwrap().push(Signal::Next(id));
        if id == 0 {
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
    }

    fn on_error(&self, _: QueryError) {
        self.signals.lock().unwrap().push(Signal::Error);
    }

    fn on_complete(&self) {
        self.signals.lock().unwrap().push(Signal::Complete);
    }
}

#[test]
fn test_cancel_during_delivery_completes_after_current_row() {
    let pool = WorkerPool::new(2).unwrap();
    let (_, session) = seeded_session(&pool, 20);
    let stream = pool.handle().block_on(session.stream(scan(20))).unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        subscription: Mutex::new(None),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        signals: Mutex::new(Vec::new()),
    });
    stream.subscribe(Arc::clone(&gate) as Arc<dyn Subscriber>);
    let subscription = gate.subscription.lock().unwrap().clone().unwrap();

    let deliverer = {
        let subscription = subscription.clone();
        std::thread::spawn(move || subscription.request(5))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    subscription.cancel();
    assert!(subscription.is_cancelled());
    assert_eq!(gate.signals(), vec![Signal::Next(0)]);

    release_tx.send(()).unwrap();
    deliverer.join().unwrap();
    subscription.cancel();

    assert_eq!(gate.signals(), vec![Signal::Complete]);
    assert_eq!(stream.cursor().available_without_fetching(), 19);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_fetch_surfaces_root_cause() {
    let pool = WorkerPool::current();
    let (client, session) = seeded_session(&pool, 20);
    client.fail_next_fetch(
        NetworkError::Connection("peer reset".into())
            .wrap("fetch failed")
            .wrap("completion failed"),
    );
    let stream = session.stream(scan(10)).await.unwrap();
    let recorder = Arc::new(Recorder::default());
    stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    recorder.subscription().request(20);
    eventually(|| recorder.terminal().is_some()).await;

    assert_eq!(recorder.delivered(), 10);
    assert_eq!(
        recorder.terminals(),
        vec![Terminal::Error(
            "transport error: connection failed: peer reset".to_string()
        )]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_deliver_exact_sum_in_order() {
    let pool = WorkerPool::current();
    let (_, session) = seeded_session(&pool, 200);
    let stream = session.stream(scan(7)).await.unwrap();
    let recorder = Arc::new(Recorder::default());
    stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

    let mut tasks = Vec::new();
    for n in [3u64, 11, 5, 17, 1, 9, 20, 8] {
        let subscription = recorder.subscription();
        tasks.push(tokio::spawn(async move { subscription.request(n) }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    eventually(|| recorder.delivered() >= 74).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(recorder.ids(), (0..74).collect::<Vec<_>>());
    assert!(recorder.terminal().is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_deliveries_never_exceed_requests(
        rows in 0i64..60,
        page_size in 1u32..15,
        requests in prop::collection::vec(1u64..25, 1..6),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let (ids, terminals) = runtime.block_on(async {
            let pool = WorkerPool::current();
            let (_, session) = seeded_session(&pool, rows);
            let stream = session.stream(scan(page_size)).await.unwrap();
            let recorder = Arc::new(Recorder::default());
            stream.subscribe(Arc::clone(&recorder) as Arc<dyn Subscriber>);

            for &n in &requests {
                recorder.subscription().request(n);
            }

            let requested: u64 = requests.iter().sum();
            let expected = usize::try_from(requested).unwrap().min(usize::try_from(rows).unwrap());
            let exhausted = requested >= u64::try_from(rows).unwrap();
            eventually(|| {
                recorder.delivered() >= expected && (!exhausted || recorder.terminal().is_some())
            })
            .await;
            tokio::time::sleep(Duration::from_millis(5)).await;

            (recorder.ids(), recorder.terminals())
        });

        let requested: u64 = requests.iter().sum();
        let expected = i64::try_from(requested).unwrap().min(rows);
        prop_assert_eq!(ids, (0..expected).collect::<Vec<_>>());
        if requested >= u64::try_from(rows).unwrap() {
            prop_assert_eq!(terminals, vec![Terminal::Complete]);
        } else {
            prop_assert!(terminals.is_empty());
        }
    }
}

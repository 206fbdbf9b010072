use std::error::Error;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use microlog::init::LoggingHandle;
use microlog::pipeline::WorkerState;
use microlog::registry::SinkRegistry;
use microlog::{Fields, LifecycleError, LogConfig, LogRecord, LogSink};
use tracing_subscriber::layer::SubscriberExt;

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl Collect {
    fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for Collect {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.lock().unwrap().push(record.message.clone());
        Ok(())
    }
}

/// Holds the worker inside its first `send` until released.
struct Gate {
    started: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl LogSink for Gate {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(started) = self.started.lock().unwrap().take() {
            started.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.seen.lock().unwrap().push(record.message.clone());
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl LogSink for Failing {
    async fn send(&self, _record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        Err("backend unavailable".into())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn handle(cfg: LogConfig, sink: Arc<dyn LogSink>) -> LoggingHandle {
    let mut registry = SinkRegistry::new();
    registry.register(sink);
    LoggingHandle::build(&cfg, registry).unwrap()
}

#[test]
fn single_producer_order_is_preserved() {
    let sink = Arc::new(Collect::default());
    let handle = handle(LogConfig::default(), sink.clone());
    let logger = handle.logger(Some("fifo"));

    let expected: Vec<String> = (0..1_000).map(|i| format!("m{i}")).collect();
    for message in &expected {
        logger.info(message.as_str(), Fields::new()).unwrap();
    }
    handle.shutdown();

    assert_eq!(sink.messages(), expected);
    assert_eq!(handle.state(), WorkerState::Stopped);
}

#[test]
fn block_policy_never_loses_records() {
    let cfg = LogConfig {
        async_queue_size: 2,
        ..LogConfig::default()
    };
    let sink = Arc::new(Collect::default());
    let handle = handle(cfg, sink.clone());

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let logger = handle.logger(Some("producer"));
            thread::spawn(move || {
                for i in 0..250 {
                    logger.info(format!("p{p}-{i}"), Fields::new()).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    handle.shutdown();

    let seen = sink.messages();
    assert_eq!(seen.len(), 1_000);
    for p in 0..4 {
        let prefix = format!("p{p}-");
        let own: Vec<_> = seen.iter().filter(|m| m.starts_with(&prefix)).cloned().collect();
        let expected: Vec<_> = (0..250).map(|i| format!("p{p}-{i}")).collect();
        assert_eq!(own, expected);
    }

    let stats = handle.queue_stats();
    assert_eq!(stats.dropped, 0);
    assert!(stats.high_water <= 2);
}

#[test]
fn drop_oldest_keeps_newest_behind_slow_sink() {
    let cfg = LogConfig {
        async_queue_size: 2,
        async_queue_drop_oldest: true,
        ..LogConfig::default()
    };
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        started: Mutex::new(Some(started_tx)),
        release: Mutex::new(release_rx),
        seen: Mutex::new(Vec::new()),
    });
    let handle = handle(cfg, gate.clone());
    let logger = handle.logger(None);

    logger.info("R0", Fields::new()).unwrap();
    started_rx.recv().unwrap();

    for i in 1..=5 {
        logger.info(format!("R{i}"), Fields::new()).unwrap();
    }
    release_tx.send(()).unwrap();
    handle.shutdown();

    assert_eq!(*gate.seen.lock().unwrap(), vec!["R0", "R4", "R5"]);

    let stats = handle.queue_stats();
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.enqueued, 6);
    assert_eq!(stats.enqueued, stats.dequeued + stats.queued as u64 + stats.dropped);
}

/// Takes a little while over every record.
#[derive(Default)]
struct Slow(Mutex<Vec<String>>);

#[async_trait]
impl LogSink for Slow {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        thread::sleep(std::time::Duration::from_micros(200));
        self.0.lock().unwrap().push(record.message.clone());
        Ok(())
    }
}

#[test]
fn drop_oldest_under_concurrent_producers_accounts_for_every_record() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 250;
    const CAPACITY: usize = 8;

    let cfg = LogConfig {
        async_queue_size: CAPACITY,
        async_queue_drop_oldest: true,
        ..LogConfig::default()
    };
    let sink = Arc::new(Slow::default());
    let handle = handle(cfg, sink.clone());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let logger = handle.logger(None);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    // Never blocks and never fails while running.
                    logger.info(format!("{p}:{seq}"), Fields::new()).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    handle.shutdown();

    let attempts = (PRODUCERS * PER_PRODUCER) as u64;
    let stats = handle.queue_stats();
    let report = handle.report();
    assert_eq!(report.delivered + stats.dropped, attempts);
    assert_eq!(stats.enqueued, attempts);
    assert_eq!(stats.queued, 0);
    assert!(stats.high_water <= CAPACITY);

    let seen = sink.0.lock().unwrap();
    assert_eq!(seen.len() as u64, report.delivered);

    // Survivors from each producer keep that producer's order.
    let mut last = vec![None::<usize>; PRODUCERS];
    for message in seen.iter() {
        let (p, seq) = message.split_once(':').unwrap();
        let (p, seq): (usize, usize) = (p.parse().unwrap(), seq.parse().unwrap());
        if let Some(previous) = last[p] {
            assert!(seq > previous, "producer {p}: {seq} after {previous}");
        }
        last[p] = Some(seq);
    }
    // Nothing is enqueued after the final record, so it always survives.
    assert!(last.iter().any(|l| *l == Some(PER_PRODUCER - 1)));
}

#[test]
fn failing_sink_does_not_starve_the_others() {
    let good = Arc::new(Collect::default());
    let mut registry = SinkRegistry::new();
    registry.register(Arc::new(Failing)).register(good.clone());
    let handle = LoggingHandle::build(&LogConfig::default(), registry).unwrap();
    let logger = handle.logger(None);

    logger.warn("first", Fields::new()).unwrap();
    logger.warn("second", Fields::new()).unwrap();
    handle.shutdown();

    assert_eq!(good.messages(), vec!["first", "second"]);
    let stats = handle.sink_stats();
    assert_eq!(stats[0].name, "failing");
    assert_eq!(stats[0].failed, 2);
    assert_eq!(stats[1].delivered, 2);
    assert_eq!(handle.report().sink_failures, 2);
}

#[test]
fn sync_mode_delivers_on_the_caller() {
    let cfg = LogConfig {
        async_mode: false,
        ..LogConfig::default()
    };
    let sink = Arc::new(Collect::default());
    let handle = handle(cfg, sink.clone());
    let logger = handle.logger(None);

    logger.error("now", Fields::new()).unwrap();
    assert_eq!(sink.messages(), vec!["now"]);

    handle.shutdown();
    assert_eq!(logger.error("later", Fields::new()), Err(LifecycleError::Stopped));
    assert_eq!(handle.queue_stats().rejected, 1);
}

#[test]
fn tracing_events_flow_through_a_local_subscriber() {
    let sink = Arc::new(Collect::default());
    let handle = handle(LogConfig::default(), sink.clone());
    let subscriber = tracing_subscriber::registry().with(handle.layer());

    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(order = 7u64, "order placed");
        tracing::debug!("below INFO");
        tracing::error!("order failed");
    });
    handle.shutdown();

    assert_eq!(sink.messages(), vec!["order placed", "order failed"]);
}

#[tokio::test]
async fn context_follows_spawned_tasks() {
    use microlog::FutureExt;

    #[derive(Default)]
    struct Attrs(Mutex<Vec<Fields>>);

    #[async_trait]
    impl LogSink for Attrs {
        async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(record.attributes.clone());
            Ok(())
        }
    }

    let sink = Arc::new(Attrs::default());
    let handle = handle(LogConfig::default(), sink.clone());
    let logger = handle.logger(None);

    let mut ctx = Fields::new();
    ctx.insert("request_id".into(), "req-7".into());
    let task = {
        let logger = logger.clone();
        async move {
            tokio::task::yield_now().await;
            logger.info("inside task", Fields::new()).unwrap();
        }
        .in_log_context(ctx)
    };
    tokio::spawn(task).await.unwrap();
    logger.info("outside", Fields::new()).unwrap();
    handle.shutdown();

    let seen = sink.0.lock().unwrap();
    assert_eq!(seen[0]["request_id"], "req-7");
    assert!(!seen[1].contains_key("request_id"));
}

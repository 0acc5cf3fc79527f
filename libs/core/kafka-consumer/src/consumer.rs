//! The consumer loop and its entry points.
//!
//! This module provides:
//! - `ConsumerLoop` for driving a reader, handler and sleeper
//! - `run_consumer_loop*` functions for running a loop to completion
//! - `spawn_*` functions for fire-and-forget consumers

use crate::config::{ConsumerConfig, SecureConsumerConfig};
use crate::error::{ConsumerError, ReadError, ReadErrorClass};
use crate::handler::Handler;
use crate::kafka::KafkaReader;
use crate::message::Message;
use crate::metrics::ConsumerMetrics;
use crate::reader::MessageReader;
use crate::retry::{Backoff, RetryPolicy, RetryState};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Resilient consumption loop over a `MessageReader`.
///
/// The loop reads one message at a time and hands it to the handler before
/// reading the next, so there is at most one handler call in flight and
/// partition order is preserved. Read errors are classified:
///
/// - **Cancellation**: close the reader and stop
/// - **End of stream**: count quietly, pause once the threshold is reached
/// - **Other**: log, count, pause once the threshold is reached
///
/// Only cancellation ends the loop. Handler errors are logged and the
/// message is skipped.
///
/// # Example
///
/// ```rust,ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let consumer = ConsumerLoop::new(reader, handler, TokioSleeper)
///     .with_policy(RetryPolicy::default());
/// let handle = consumer.spawn(shutdown_rx);
/// ```
pub struct ConsumerLoop<R, H, S> {
    reader: R,
    handler: H,
    sleeper: S,
    state: RetryState,
    metrics: ConsumerMetrics,
    span: Span,
}

impl<R, H, S> ConsumerLoop<R, H, S>
where
    R: MessageReader,
    H: Handler,
    S: Sleeper,
{
    /// Create a consumer loop with the default retry policy.
    pub fn new(reader: R, handler: H, sleeper: S) -> Self {
        let metrics = ConsumerMetrics::new(reader.topic());
        Self {
            reader,
            handler,
            sleeper,
            state: RetryState::default(),
            metrics,
            span: info_span!("kafka_consumer"),
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.state = RetryState::new(policy);
        self
    }

    /// Log every event of this loop under the given span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Current number of consecutive read errors.
    pub fn retry_count(&self) -> u32 {
        self.state.retry_count()
    }

    /// Run until the reader reports cancellation, then close the reader.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let span = self.span.clone();
        async move {
            info!("Kafka consumer: ready to consume messages");

            while self.step(&mut shutdown).await.is_continue() {}

            if let Err(e) = self.reader.close() {
                warn!(error = %e, "Kafka consumer: failed to close reader");
            }
            info!("Kafka consumer stopped");
        }
        .instrument(span)
        .await
    }

    /// Launch the loop on its own task and return immediately.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        R: 'static,
        H: 'static,
        S: 'static,
    {
        tokio::spawn(self.run(shutdown))
    }

    /// One read attempt plus whatever it triggers: dispatch, backoff or stop.
    pub(crate) async fn step(&mut self, shutdown: &mut watch::Receiver<bool>) -> ControlFlow<()> {
        match self.reader.read(shutdown).await {
            Ok(message) => {
                self.state.record_success();
                self.dispatch(message, shutdown).await;
                ControlFlow::Continue(())
            }
            Err(e) => self.on_read_error(e).await,
        }
    }

    async fn dispatch(&mut self, message: Message, shutdown: &watch::Receiver<bool>) {
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            time = ?message.timestamp,
            "Kafka consumer: received message"
        );
        self.metrics.message_received(message.partition);

        if let Err(e) = self
            .handler
            .handle(shutdown, message.key_bytes(), &message.value)
            .await
        {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Kafka consumer: failed to handle message"
            );
            self.metrics.handler_failed();
        }
    }

    async fn on_read_error(&mut self, err: ReadError) -> ControlFlow<()> {
        let class = err.class();
        self.metrics.read_error(class);

        match class {
            ReadErrorClass::Cancellation => {
                info!(reason = %err, "Kafka consumer: context cancelled, shutting down");
                return ControlFlow::Break(());
            }
            ReadErrorClass::EndOfStream => {
                let outcome = self.state.record_end_of_stream(Instant::now());
                if outcome.notify {
                    debug!(
                        retry_count = self.state.retry_count(),
                        "Kafka consumer: no new messages, partition at end"
                    );
                }
                if let Backoff::Pause(duration) = outcome.backoff {
                    self.pause(duration, class).await;
                }
            }
            ReadErrorClass::Other => {
                error!(
                    error = %err,
                    retry_count = self.state.retry_count(),
                    "Kafka consumer: failed to read message"
                );
                if let Backoff::Pause(duration) = self.state.record_failure() {
                    warn!(
                        backoff_secs = duration.as_secs(),
                        "Kafka consumer: max retry count reached, pausing"
                    );
                    self.pause(duration, class).await;
                }
            }
        }

        ControlFlow::Continue(())
    }

    async fn pause(&mut self, duration: Duration, class: ReadErrorClass) {
        self.metrics.backoff(class);
        self.sleeper.sleep(duration).await;
        self.state.reset();
    }
}

/// Run a consumer loop with real-time backoff until cancellation.
pub async fn run_consumer_loop<R, H>(reader: R, handler: H, shutdown: watch::Receiver<bool>)
where
    R: MessageReader,
    H: Handler,
{
    run_consumer_loop_with_sleeper(reader, handler, TokioSleeper, shutdown).await
}

/// Run a consumer loop with the given sleeper until cancellation.
///
/// This is the synchronous driver: it returns only after the reader reports
/// cancellation and has been closed.
pub async fn run_consumer_loop_with_sleeper<R, H, S>(
    reader: R,
    handler: H,
    sleeper: S,
    shutdown: watch::Receiver<bool>,
) where
    R: MessageReader,
    H: Handler,
    S: Sleeper,
{
    ConsumerLoop::new(reader, handler, sleeper)
        .run(shutdown)
        .await
}

/// Launch a consumer loop on its own task.
pub fn spawn_consumer_loop<R, H, S>(
    reader: R,
    handler: H,
    sleeper: S,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: MessageReader + 'static,
    H: Handler + 'static,
    S: Sleeper + 'static,
{
    ConsumerLoop::new(reader, handler, sleeper).spawn(shutdown)
}

/// Build a plain Kafka reader and launch a consumer loop on it.
///
/// Configuration and client errors are returned before anything is spawned.
pub fn spawn_consumer<H>(
    config: ConsumerConfig,
    handler: H,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, ConsumerError>
where
    H: Handler + 'static,
{
    info!(
        brokers = ?config.brokers,
        topic = %config.topic,
        group_id = %config.group_id,
        "Starting Kafka consumer"
    );

    let reader = KafkaReader::new(&config)?;
    let span = consumer_span(&config);

    Ok(ConsumerLoop::new(reader, handler, TokioSleeper)
        .with_span(span)
        .spawn(shutdown))
}

/// Build a SASL/TLS Kafka reader and launch a consumer loop on it.
///
/// Malformed credentials are rejected before anything is spawned.
pub fn spawn_secure_consumer<H>(
    config: SecureConsumerConfig,
    handler: H,
    shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, ConsumerError>
where
    H: Handler + 'static,
{
    info!(
        brokers = ?config.consumer.brokers,
        topic = %config.consumer.topic,
        use_ssl = config.use_ssl,
        "Starting secure Kafka consumer"
    );

    let reader = KafkaReader::new_secure(&config)?;
    let span = consumer_span(&config.consumer);

    Ok(ConsumerLoop::new(reader, handler, TokioSleeper)
        .with_span(span)
        .spawn(shutdown))
}

fn consumer_span(config: &ConsumerConfig) -> Span {
    info_span!(
        "kafka_consumer",
        topic = %config.topic,
        group_id = %config.group_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::MockHandler;
    use crate::metrics::testing::{counter_value, counters, recorder};
    use crate::sleeper::{InstantSleeper, MockSleeper};
    use mockall::predicate::eq;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reader that replays a fixed script, then reports cancellation.
    struct ScriptedReader {
        script: VecDeque<Result<Message, ReadError>>,
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedReader {
        fn new(script: Vec<Result<Message, ReadError>>) -> Self {
            Self {
                script: script.into(),
                reads: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
            (self.reads.clone(), self.closes.clone())
        }
    }

    #[async_trait::async_trait]
    impl MessageReader for ScriptedReader {
        async fn read(
            &mut self,
            _shutdown: &mut watch::Receiver<bool>,
        ) -> Result<Message, ReadError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or(Err(ReadError::Canceled))
        }

        fn close(&mut self) -> Result<(), ReadError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn topic(&self) -> &str {
            "test-topic"
        }
    }

    fn message(offset: i64, key: &str, value: &str) -> Result<Message, ReadError> {
        Ok(Message::new("test-topic", 0, offset, value).with_key(key))
    }

    fn eof() -> Result<Message, ReadError> {
        Err(ReadError::EndOfPartition {
            topic: "test-topic".to_string(),
            partition: 0,
        })
    }

    fn broker_down() -> Result<Message, ReadError> {
        Err(ReadError::other("broker unavailable"))
    }

    fn shutdown() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn test_successful_message_processing() {
        let reader = ScriptedReader::new(vec![message(1, "k", "v"), Err(ReadError::Canceled)]);
        let (reads, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .withf(|_, key, value| key == b"k".as_slice() && value == b"v".as_slice())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();

        run_consumer_loop_with_sleeper(reader, handler, sleeper, shutdown()).await;

        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_canceled_error() {
        let reader = ScriptedReader::new(vec![Err(ReadError::Canceled)]);
        let (reads, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        run_consumer_loop_with_sleeper(reader, handler, InstantSleeper, shutdown()).await;

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_exceeded_stops_loop() {
        let reader = ScriptedReader::new(vec![
            broker_down(),
            message(1, "k", "v"),
            Err(ReadError::DeadlineExceeded),
            message(2, "never", "read"),
        ]);
        let (reads, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler.expect_handle().times(1).returning(|_, _, _| Ok(()));

        run_consumer_loop_with_sleeper(reader, handler, InstantSleeper, shutdown()).await;

        assert_eq!(reads.load(Ordering::SeqCst), 3);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eof_error_with_retry_logic() {
        let mut script: Vec<_> = (0..11).map(|_| eof()).collect();
        script.push(Err(ReadError::Canceled));
        let reader = ScriptedReader::new(script);
        let (reads, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_secs(10)))
            .times(1)
            .return_const(());

        run_consumer_loop_with_sleeper(reader, handler, sleeper, shutdown()).await;

        assert_eq!(reads.load(Ordering::SeqCst), 12);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ten_eofs_then_cancel_sleeps_once() {
        let mut script: Vec<_> = (0..10).map(|_| eof()).collect();
        script.push(Err(ReadError::Canceled));
        let reader = ScriptedReader::new(script);

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().times(1).return_const(());

        run_consumer_loop_with_sleeper(reader, handler, sleeper, shutdown()).await;
    }

    #[tokio::test]
    async fn test_cancellation_before_threshold_skips_sleep() {
        let mut script: Vec<_> = (0..9).map(|_| broker_down()).collect();
        script.push(Err(ReadError::Canceled));
        let reader = ScriptedReader::new(script);
        let (_, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();

        run_consumer_loop_with_sleeper(reader, handler, sleeper, shutdown()).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_loop() {
        let script = (1..=5)
            .map(|offset| message(offset, "k", "v"))
            .chain(std::iter::once(Err(ReadError::Canceled)))
            .collect();
        let reader = ScriptedReader::new(script);
        let (reads, _) = reader.counters();

        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .times(5)
            .returning(|_, _, _| Err(HandlerError::failed("handler error")));

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().never();

        let mut consumer = ConsumerLoop::new(reader, handler, sleeper);
        let mut rx = shutdown();

        for _ in 0..5 {
            assert!(consumer.step(&mut rx).await.is_continue());
            assert_eq!(consumer.retry_count(), 0);
        }
        assert!(consumer.step(&mut rx).await.is_break());
        assert_eq!(reads.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_block_next_message() {
        let reader = ScriptedReader::new(vec![
            message(1, "k1", "bad"),
            message(2, "k2", "good"),
            Err(ReadError::Canceled),
        ]);

        let mut handler = MockHandler::new();
        let mut seq = mockall::Sequence::new();
        handler
            .expect_handle()
            .withf(|_, key, _| key == b"k1".as_slice())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(HandlerError::failed("cannot parse")));
        handler
            .expect_handle()
            .withf(|_, key, _| key == b"k2".as_slice())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        run_consumer_loop_with_sleeper(reader, handler, InstantSleeper, shutdown()).await;
    }

    #[tokio::test]
    async fn test_success_resets_retry_count() {
        let reader = ScriptedReader::new(vec![
            broker_down(),
            broker_down(),
            eof(),
            message(1, "k", "v"),
            broker_down(),
            message(2, "k", "v"),
        ]);

        let mut handler = MockHandler::new();
        handler.expect_handle().times(2).returning(|_, _, _| Ok(()));

        let mut consumer = ConsumerLoop::new(reader, handler, InstantSleeper);
        let mut rx = shutdown();

        for expected in [1, 2, 3, 0, 1, 0] {
            assert!(consumer.step(&mut rx).await.is_continue());
            assert_eq!(consumer.retry_count(), expected);
        }
        assert!(consumer.step(&mut rx).await.is_break());
    }

    #[tokio::test]
    async fn test_mixed_errors_pause_once_then_reset() {
        let script = (0..10)
            .map(|i| if i % 2 == 0 { eof() } else { broker_down() })
            .collect();
        let reader = ScriptedReader::new(script);

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_secs(10)))
            .times(1)
            .return_const(());

        let mut consumer = ConsumerLoop::new(reader, handler, sleeper);
        let mut rx = shutdown();

        for expected in 1..10 {
            assert!(consumer.step(&mut rx).await.is_continue());
            assert_eq!(consumer.retry_count(), expected);
        }

        // The 10th error pauses and the counter starts over
        assert!(consumer.step(&mut rx).await.is_continue());
        assert_eq!(consumer.retry_count(), 0);

        // The 11th attempt is the scripted cancellation
        assert!(consumer.step(&mut rx).await.is_break());
    }

    #[tokio::test]
    async fn test_sustained_errors_never_terminate() {
        let script = (0..35).map(|_| broker_down()).collect();
        let reader = ScriptedReader::new(script);
        let (reads, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        let mut sleeper = MockSleeper::new();
        sleeper.expect_sleep().times(3).return_const(());

        run_consumer_loop_with_sleeper(reader, handler, sleeper, shutdown()).await;

        // 35 errors, then the exhausted script reports cancellation
        assert_eq!(reads.load(Ordering::SeqCst), 36);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_policy() {
        let script = (0..4).map(|_| broker_down()).collect();
        let reader = ScriptedReader::new(script);

        let mut handler = MockHandler::new();
        handler.expect_handle().never();

        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_millis(250)))
            .times(2)
            .return_const(());

        let policy = RetryPolicy::new()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(250));

        ConsumerLoop::new(reader, handler, sleeper)
            .with_policy(policy)
            .run(shutdown())
            .await;
    }

    #[test]
    fn test_loop_metrics_are_labelled_by_topic() {
        let (recorder, snapshotter) = recorder();

        let mut script: Vec<_> = (0..10).map(|_| broker_down()).collect();
        script.push(message(1, "k", "v"));
        let reader = ScriptedReader::new(script);

        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_, _, _| Err(HandlerError::failed("bad payload")));

        ::metrics::with_local_recorder(&recorder, || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(run_consumer_loop_with_sleeper(
                    reader,
                    handler,
                    InstantSleeper,
                    shutdown(),
                ));
        });
        let samples = counters(&snapshotter);

        let topic = ("topic", "test-topic");
        assert_eq!(
            counter_value(
                &samples,
                "kafka_consumer_read_errors_total",
                &[topic, ("class", "other")]
            ),
            10
        );
        assert_eq!(
            counter_value(
                &samples,
                "kafka_consumer_read_errors_total",
                &[topic, ("class", "cancellation")]
            ),
            1
        );
        assert_eq!(
            counter_value(
                &samples,
                "kafka_consumer_backoffs_total",
                &[topic, ("class", "other")]
            ),
            1
        );
        assert_eq!(
            counter_value(
                &samples,
                "kafka_consumer_messages_received_total",
                &[topic, ("partition", "0")]
            ),
            1
        );
        assert_eq!(
            counter_value(&samples, "kafka_consumer_handler_failures_total", &[topic]),
            1
        );
    }

    #[tokio::test]
    async fn test_handler_sees_shutdown_signal() {
        let reader = ScriptedReader::new(vec![message(1, "k", "v")]);

        let mut handler = MockHandler::new();
        handler
            .expect_handle()
            .withf(|shutdown, _, _| !*shutdown.borrow())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let (_tx, rx) = watch::channel(false);
        run_consumer_loop_with_sleeper(reader, handler, InstantSleeper, rx).await;
    }

    #[tokio::test]
    async fn test_spawn_consumer_loop_returns_immediately() {
        let reader = ScriptedReader::new(vec![message(1, "k", "v")]);
        let (_, closes) = reader.counters();

        let mut handler = MockHandler::new();
        handler.expect_handle().times(1).returning(|_, _, _| Ok(()));

        let handle = spawn_consumer_loop(reader, handler, InstantSleeper, shutdown());
        handle.await.expect("consumer task panicked");

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_independent_loops_share_nothing() {
        let first = ScriptedReader::new(vec![message(1, "a", "1"), message(2, "a", "2")]);
        let second = ScriptedReader::new(vec![broker_down(), message(1, "b", "1")]);
        let (first_reads, _) = first.counters();
        let (second_reads, _) = second.counters();

        let mut first_handler = MockHandler::new();
        first_handler.expect_handle().times(2).returning(|_, _, _| Ok(()));
        let mut second_handler = MockHandler::new();
        second_handler.expect_handle().times(1).returning(|_, _, _| Ok(()));

        let a = spawn_consumer_loop(first, first_handler, InstantSleeper, shutdown());
        let b = spawn_consumer_loop(second, second_handler, InstantSleeper, shutdown());
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert_eq!(first_reads.load(Ordering::SeqCst), 3);
        assert_eq!(second_reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_spawn_consumer_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let config = ConsumerConfig::new(["localhost:9092"], "test-topic", "test-group");

        let handle =
            spawn_consumer(config, crate::handler::LogHandler, rx).expect("consumer starts");
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("consumer did not stop")
            .expect("consumer task panicked");
    }

    #[tokio::test]
    async fn test_spawn_consumer_rejects_invalid_config() {
        let config = ConsumerConfig::new(["localhost:9092"], "", "test-group");
        let result = spawn_consumer(config, crate::handler::LogHandler, shutdown());
        assert!(matches!(result, Err(ConsumerError::Config(_))));
    }

    #[tokio::test]
    async fn test_spawn_secure_consumer_rejects_bad_credentials() {
        let base = ConsumerConfig::new(["localhost:9092"], "test-topic", "test-group");
        let config = SecureConsumerConfig::new(base, "svc", "").with_ssl(true);

        let result = spawn_secure_consumer(config, crate::handler::LogHandler, shutdown());
        assert!(matches!(result, Err(ConsumerError::InvalidCredentials(_))));
    }
}

//! Message transport module
//!
//! This module queues outbound commands by priority, drains them to the
//! wire one at a time, and routes decoded inbound messages to subscribers
//! and pending response callbacks.

pub mod callback;
pub mod connection;
pub mod protocol;
pub mod queue;

pub use self::callback::{Callback, CallbackOutcome, CallbackRegistry, Clock, ManualClock, SystemClock};
pub use self::protocol::{MessageProtocol, TransportEvent};
pub use self::queue::{DispatchQueue, Prioritized};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::{Config, Error, Priority, Result};
use crate::protocol::{decode, validate, Command, Message};

/// How long the drain loop sleeps when the queue is empty
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receiver of transport events
///
/// Every method but `data_received` defaults to doing nothing.
pub trait Subscriber: Send + Sync {
    /// Called once, when the subscriber is attached
    fn connection_made(&self, _transport: &Arc<MessageTransport>) {}

    /// Called for every valid inbound message
    fn data_received(&self, msg: &Message);

    /// The queue is at or above its high-water mark; may repeat
    fn pause_writing(&self) {}

    /// The queue is at or below its low-water mark; may repeat
    fn resume_writing(&self) {}

    /// Called exactly once, after the transport has closed or aborted
    fn connection_lost(&self, _error: Option<&Error>) {}
}

/// A queued command, with the callback to register when it is sent
struct Outbound {
    cmd: Command,
    callback: Option<Callback>,
}

impl Prioritized for Outbound {
    fn priority(&self) -> Priority {
        self.cmd.priority()
    }
}

#[derive(Debug, Clone, Copy)]
struct WaterMarks {
    high: usize,
    low: usize,
}

/// Queued, flow-controlled transport of RAMSES-II messages
pub struct MessageTransport {
    config: Config,
    queue: DispatchQueue<Outbound>,
    callbacks: Arc<CallbackRegistry>,
    subscribers: Mutex<Vec<Arc<dyn Subscriber>>>,
    marks: Mutex<WaterMarks>,
    write_paused: AtomicBool,
    started: AtomicBool,
    closing: AtomicBool,
    aborted: AtomicBool,
    lost: AtomicBool,
    lost_error: Mutex<Option<Error>>,
}

impl MessageTransport {
    /// Creates a transport that is not yet attached to a wire
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        config.validate()?;

        let marks = WaterMarks {
            high: config.write_buffer_high,
            low: config.low_water_mark(),
        };

        Ok(Arc::new(MessageTransport {
            queue: DispatchQueue::new(config.queue_capacity),
            callbacks: Arc::new(CallbackRegistry::new(clock)),
            subscribers: Mutex::new(Vec::new()),
            marks: Mutex::new(marks),
            write_paused: AtomicBool::new(false),
            started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            lost_error: Mutex::new(None),
            config,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Attaches a subscriber and tells it the connection is made
    pub fn add_protocol(self: &Arc<Self>, subscriber: Arc<dyn Subscriber>) -> Result<()> {
        {
            let mut subscribers = lock(&self.subscribers);
            if subscribers.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
                return Ok(());
            }
            if subscribers.len() >= self.config.max_subscribers {
                return Err(Error::TooManySubscribers(self.config.max_subscribers));
            }
            subscribers.push(subscriber.clone());
        }

        tracing::debug!("Subscriber attached");
        subscriber.connection_made(self);
        Ok(())
    }

    pub fn get_protocols(&self) -> Vec<Arc<dyn Subscriber>> {
        lock(&self.subscribers).clone()
    }

    /// Starts the drain loop, handing each dispatched line to `dispatcher`
    pub fn start(self: &Arc<Self>, dispatcher: mpsc::Sender<String>) -> Result<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::config("transport already has a dispatcher"));
        }
        if self.is_closing() {
            return Err(Error::transport_closed("cannot start a closed transport"));
        }

        let transport = Arc::clone(self);
        Ok(tokio::spawn(async move { transport.drain(dispatcher).await }))
    }

    async fn drain(self: Arc<Self>, dispatcher: mpsc::Sender<String>) {
        tracing::debug!("Drain loop started");

        loop {
            if self.aborted.load(Ordering::SeqCst) {
                break;
            }
            match self.queue.pop() {
                Some(outbound) => {
                    self.dispatch(outbound, &dispatcher).await;
                    self.get_write_buffer_size();
                }
                // nothing is queued behind a closed queue, so an empty one stays empty
                None if self.queue.is_closed() && self.queue.is_empty() => break,
                None => tokio::time::sleep(DRAIN_POLL_INTERVAL).await,
            }
        }

        tracing::debug!("Drain loop finished");
        self.notify_connection_lost();
    }

    async fn dispatch(&self, outbound: Outbound, dispatcher: &mpsc::Sender<String>) {
        let Outbound { cmd, callback } = outbound;

        // the deadline starts at transmission, not at enqueue
        if let (Some(callback), Some(header)) = (callback, cmd.rx_header()) {
            let timeout = callback.timeout;
            let id = self.callbacks.register(header, callback);
            if let Some(timeout) = timeout {
                let registry = Arc::clone(&self.callbacks);
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    registry.expire(id);
                });
            }
        }

        tracing::debug!("Dispatching {}", cmd);
        if let Err(e) = dispatcher.send(cmd.to_line()).await {
            tracing::error!("Failed to dispatch {}: {}", cmd, e);
        }
    }

    /// Queues a command for sending
    pub async fn write(&self, cmd: Command) -> Result<()> {
        self.enqueue(cmd, None).await
    }

    /// Queues a command whose response will be handed to `callback`
    pub async fn write_with_callback(&self, cmd: Command, callback: Callback) -> Result<()> {
        if cmd.rx_header().is_none() {
            return Err(Error::invalid_command(format!(
                "no response is expected to {}",
                cmd
            )));
        }
        self.enqueue(cmd, Some(callback)).await
    }

    /// Queues several commands, in order
    pub async fn writelines<I>(&self, cmds: I) -> Result<()>
    where
        I: IntoIterator<Item = Command>,
    {
        for cmd in cmds {
            self.write(cmd).await?;
        }
        Ok(())
    }

    async fn enqueue(&self, cmd: Command, callback: Option<Callback>) -> Result<()> {
        if self.is_closing() {
            return Err(Error::transport_closed(format!("cannot send {}", cmd)));
        }

        if self.config.disable_sending {
            tracing::warn!("Sending disabled, discarded: {}", cmd);
        } else {
            let cmd = cmd.with_source(self.config.gateway_id);
            tracing::debug!("Queueing {}", cmd);
            self.queue
                .enqueue(Outbound { cmd, callback }, self.config.block_when_full)
                .await?;
        }

        self.get_write_buffer_size();
        Ok(())
    }

    /// Sends a command and waits for its response, re-sending on timeout
    pub async fn request(&self, cmd: Command) -> Result<Message> {
        self.request_within(cmd, self.config.default_timeout).await
    }

    /// As `request`, with an explicit per-attempt timeout
    pub async fn request_within(&self, cmd: Command, timeout: Duration) -> Result<Message> {
        let header = cmd
            .rx_header()
            .ok_or_else(|| Error::invalid_command(format!("no response is expected to {}", cmd)))?;
        if self.config.disable_sending {
            return Err(Error::transport_closed("sending is disabled"));
        }

        let attempts = u32::from(cmd.qos().retries) + 1;
        for attempt in 1..=attempts {
            let (tx, rx) = oneshot::channel();
            let tx = Mutex::new(Some(tx));
            let callback = Callback::new(
                move |outcome| {
                    if let Some(tx) = lock(&tx).take() {
                        let _ = tx.send(outcome);
                    }
                },
                timeout,
            );
            self.write_with_callback(cmd.clone(), callback).await?;

            match rx.await {
                Ok(CallbackOutcome::Matched(msg)) => return Ok(msg),
                Ok(CallbackOutcome::Expired) => {
                    tracing::warn!("No response for {} (attempt {}/{})", header, attempt, attempts);
                }
                Err(_) => {
                    return Err(Error::transport_closed(format!(
                        "{} was discarded before it was sent",
                        cmd
                    )))
                }
            }
        }

        Err(Error::expired_callback(header.to_string()))
    }

    /// Handles one line read from the wire
    ///
    /// Returns the message if the line was valid.
    pub fn on_line_received(&self, line: &str) -> Option<Message> {
        let arrival = self.callbacks.clock().now();
        let Some(packet) = decode(line, arrival) else {
            return None;
        };

        let msg = validate(packet);
        if !msg.is_valid() {
            self.callbacks.sweep();
            return None;
        }

        tracing::debug!("Received {}", msg);
        self.callbacks.on_message(&msg);
        for subscriber in self.get_protocols() {
            subscriber.data_received(&msg);
        }
        Some(msg)
    }

    /// Expires overdue callbacks without waiting for traffic
    pub fn expire_callbacks(&self) -> usize {
        self.callbacks.sweep()
    }

    /// Stops accepting commands; those queued are still sent
    pub fn close(&self) {
        tracing::debug!("Closing transport");
        self.closing.store(true, Ordering::SeqCst);
        self.queue.close();
        if !self.started.load(Ordering::SeqCst) {
            self.notify_connection_lost();
        }
    }

    /// Stops at once, discarding queued commands
    pub fn abort(&self) {
        self.abort_with(None);
    }

    /// Stops at once, reporting `error` to subscribers as the cause
    pub fn abort_with(&self, error: Option<Error>) {
        if let Some(error) = error {
            lock(&self.lost_error).get_or_insert(error);
        }
        self.closing.store(true, Ordering::SeqCst);
        self.aborted.store(true, Ordering::SeqCst);

        let dropped = self.queue.clear();
        tracing::debug!("Aborting transport, {} queued commands discarded", dropped);
        if !self.started.load(Ordering::SeqCst) {
            self.notify_connection_lost();
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Sets the flow-control water marks; `low` defaults to 80% of `high`
    pub fn set_write_buffer_limits(&self, high: Option<usize>, low: Option<usize>) -> Result<()> {
        let high = high.unwrap_or(crate::core::DEFAULT_WRITE_BUFFER_HIGH);
        let low = low.unwrap_or_else(|| crate::core::default_low_water_mark(high));
        if low > high {
            return Err(Error::config(format!(
                "low-water mark ({}) exceeds high-water mark ({})",
                low, high
            )));
        }

        *lock(&self.marks) = WaterMarks { high, low };
        self.get_write_buffer_size();
        Ok(())
    }

    /// Current queue depth; signals pause or resume to subscribers as it stands
    pub fn get_write_buffer_size(&self) -> usize {
        let depth = self.queue.len();
        let marks = *lock(&self.marks);

        if depth > 0 && depth >= marks.high {
            self.write_paused.store(true, Ordering::SeqCst);
            for subscriber in self.get_protocols() {
                subscriber.pause_writing();
            }
        } else if depth <= marks.low {
            self.write_paused.store(false, Ordering::SeqCst);
            for subscriber in self.get_protocols() {
                subscriber.resume_writing();
            }
        }
        depth
    }

    /// Whether producers were last told to pause
    pub fn is_write_paused(&self) -> bool {
        self.write_paused.load(Ordering::SeqCst)
    }

    fn notify_connection_lost(&self) {
        if self.lost.swap(true, Ordering::SeqCst) {
            return;
        }

        let error = lock(&self.lost_error).take();
        tracing::debug!("Connection lost: {:?}", error);
        for subscriber in self.get_protocols() {
            subscriber.connection_lost(error.as_ref());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Verb;
    use crate::protocol::Qos;
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    #[derive(Default)]
    struct Recorder {
        made: AtomicUsize,
        received: Mutex<Vec<String>>,
        pauses: AtomicUsize,
        resumes: AtomicUsize,
        lost: AtomicUsize,
    }

    impl Subscriber for Recorder {
        fn connection_made(&self, _transport: &Arc<MessageTransport>) {
            self.made.fetch_add(1, Ordering::SeqCst);
        }

        fn data_received(&self, msg: &Message) {
            self.received.lock().unwrap().push(msg.packet().to_string());
        }

        fn pause_writing(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        fn resume_writing(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }

        fn connection_lost(&self, _error: Option<&Error>) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    const RP_0016: &str = "RP --- 01:145038 18:000730 --:------ 0016 002 0022";

    fn rq_0016(priority: Priority) -> Command {
        Command::encode("RQ", "01:145038", "0016", "00", Qos::new(priority, 0)).unwrap()
    }

    fn transport(config: Config) -> (Arc<MessageTransport>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000)));
        (MessageTransport::new(config, clock.clone()).unwrap(), clock)
    }

    #[tokio::test]
    async fn test_dispatch_order_follows_priority() {
        let (transport, _clock) = transport(Config::default());
        for (priority, payload) in [
            (Priority::Default, "01"),
            (Priority::Low, "02"),
            (Priority::High, "03"),
            (Priority::Default, "04"),
        ] {
            let cmd = Command::encode("RQ", "01:145038", "0004", &format!("{}00", payload), Qos::new(priority, 0))
                .unwrap();
            transport.write(cmd).await.unwrap();
        }

        let (tx, mut rx) = mpsc::channel(10);
        let writer = transport.start(tx).unwrap();
        let mut sent = Vec::new();
        for _ in 0..4 {
            let line = rx.recv().await.unwrap();
            sent.push(line[46..48].to_string());
        }
        assert_eq!(sent, ["03", "01", "04", "02"]);

        transport.close();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_source_is_the_gateway_id() {
        let config = Config {
            gateway_id: "18:005570".parse().unwrap(),
            ..Config::default()
        };
        let (transport, _clock) = transport(config);
        transport.write(rq_0016(Priority::High)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let _writer = transport.start(tx).unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            "RQ --- 18:005570 01:145038 --:------ 0016 001 00"
        );
    }

    #[tokio::test]
    async fn test_subscriber_limit() {
        let (transport, _clock) = transport(Config::default());
        let recorders: Vec<Arc<Recorder>> = (0..4).map(|_| Arc::new(Recorder::default())).collect();

        for recorder in &recorders[..3] {
            transport.add_protocol(recorder.clone()).unwrap();
        }
        // attaching twice is a no-op
        transport.add_protocol(recorders[0].clone()).unwrap();
        assert_eq!(recorders[0].made.load(Ordering::SeqCst), 1);

        let err = transport.add_protocol(recorders[3].clone()).unwrap_err();
        assert!(matches!(err, Error::TooManySubscribers(3)));
        assert_eq!(transport.get_protocols().len(), 3);
    }

    #[tokio::test]
    async fn test_only_valid_messages_are_delivered() {
        let (transport, _clock) = transport(Config::default());
        let recorder = Arc::new(Recorder::default());
        transport.add_protocol(recorder.clone()).unwrap();

        assert!(transport.on_line_received(RP_0016).is_some());
        assert!(transport.on_line_received("RP --- 01:145038 18:000730 --:------ 0016 001 00").is_none());
        assert!(transport.on_line_received("garbage").is_none());

        assert_eq!(*recorder.received.lock().unwrap(), [RP_0016]);
    }

    #[tokio::test]
    async fn test_flow_control_is_level_triggered() {
        let config = Config {
            write_buffer_high: 2,
            write_buffer_low: Some(1),
            ..Config::default()
        };
        let (transport, _clock) = transport(config);
        let recorder = Arc::new(Recorder::default());
        transport.add_protocol(recorder.clone()).unwrap();

        // depth 1 sits on the low-water mark
        transport.write(rq_0016(Priority::Low)).await.unwrap();
        assert_eq!(recorder.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.pauses.load(Ordering::SeqCst), 0);

        transport.write(rq_0016(Priority::Low)).await.unwrap();
        transport.write(rq_0016(Priority::Low)).await.unwrap();
        assert_eq!(transport.get_write_buffer_size(), 3);
        assert_eq!(recorder.pauses.load(Ordering::SeqCst), 3);
        assert!(transport.is_write_paused());

        transport.set_write_buffer_limits(Some(5), None).unwrap();
        assert_eq!(recorder.pauses.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.resumes.load(Ordering::SeqCst), 2);
        assert!(!transport.is_write_paused());

        assert!(transport.set_write_buffer_limits(Some(2), Some(3)).is_err());
    }

    #[tokio::test]
    async fn test_huge_high_water_mark_is_accepted() {
        let (transport, _clock) = transport(Config::default());
        transport.set_write_buffer_limits(Some(usize::MAX), None).unwrap();
        transport.write(rq_0016(Priority::Low)).await.unwrap();
        assert!(!transport.is_write_paused());
    }

    #[tokio::test]
    async fn test_callback_deadline_starts_at_dispatch() {
        let (transport, clock) = transport(Config::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let callback = Callback::new(
            move |outcome: CallbackOutcome| sink.lock().unwrap().push(outcome.is_expired()),
            Duration::from_secs(3),
        );
        transport.write_with_callback(rq_0016(Priority::High), callback).await.unwrap();
        assert!(transport.callbacks().is_empty());

        // queued for far longer than the timeout before being sent
        clock.advance(Duration::from_secs(10));

        let (tx, mut rx) = mpsc::channel(1);
        let _writer = transport.start(tx).unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(transport.callbacks().len(), 1);

        transport.on_line_received(RP_0016);
        assert_eq!(*calls.lock().unwrap(), [false]);
        assert!(transport.callbacks().is_empty());
    }

    #[tokio::test]
    async fn test_drain_loop_survives_lost_writer() {
        let (transport, _clock) = transport(Config::default());
        let recorder = Arc::new(Recorder::default());
        transport.add_protocol(recorder.clone()).unwrap();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let writer = transport.start(tx).unwrap();

        transport.write(rq_0016(Priority::Default)).await.unwrap();
        transport.write(rq_0016(Priority::Default)).await.unwrap();
        for _ in 0..100 {
            if transport.get_write_buffer_size() == 0 {
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        assert_eq!(transport.get_write_buffer_size(), 0);
        assert!(!writer.is_finished());

        transport.close();
        writer.await.unwrap();
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_before_start_reports_lost_once() {
        let (transport, _clock) = transport(Config::default());
        let recorder = Arc::new(Recorder::default());
        transport.add_protocol(recorder.clone()).unwrap();

        transport.write(rq_0016(Priority::Default)).await.unwrap();
        transport.write(rq_0016(Priority::Default)).await.unwrap();
        transport.close();
        transport.close();

        let err = transport.write(rq_0016(Priority::High)).await.unwrap_err();
        assert!(matches!(err, Error::TransportClosed(_)));

        let (tx, mut rx) = mpsc::channel(10);
        assert!(transport.start(tx).is_err());
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_after_start_flushes_queue() {
        let (transport, _clock) = transport(Config::default());
        let recorder = Arc::new(Recorder::default());
        transport.add_protocol(recorder.clone()).unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let writer = transport.start(tx).unwrap();
        transport.write(rq_0016(Priority::Default)).await.unwrap();
        transport.write(rq_0016(Priority::Default)).await.unwrap();
        transport.close();
        writer.await.unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);

        transport.abort();
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_discards_queue() {
        let (transport, _clock) = transport(Config::default());
        let recorder = Arc::new(Recorder::default());
        transport.add_protocol(recorder.clone()).unwrap();

        for _ in 0..5 {
            transport.write(rq_0016(Priority::Low)).await.unwrap();
        }
        let (tx, mut rx) = mpsc::channel(10);
        transport.abort();
        assert_eq!(transport.get_write_buffer_size(), 0);
        assert!(transport.start(tx).is_err());
        assert!(rx.recv().await.is_none());
        assert_eq!(recorder.lost.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_sending_discards() {
        let config = Config {
            disable_sending: true,
            ..Config::default()
        };
        let (transport, _clock) = transport(config);
        transport.write(rq_0016(Priority::High)).await.unwrap();
        assert_eq!(transport.get_write_buffer_size(), 0);

        let err = transport.request(rq_0016(Priority::High)).await.unwrap_err();
        assert!(matches!(err, Error::TransportClosed(_)));
    }

    #[tokio::test]
    async fn test_fail_fast_on_full_queue() {
        let config = Config {
            queue_capacity: 1,
            block_when_full: false,
            write_buffer_high: 1,
            write_buffer_low: Some(0),
            ..Config::default()
        };
        let (transport, _clock) = transport(config);
        transport.write(rq_0016(Priority::Low)).await.unwrap();
        let err = transport.write(rq_0016(Priority::Low)).await.unwrap_err();
        assert!(matches!(err, Error::QueueCapacityExceeded(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_expires_once() {
        let (transport, _clock) = transport(Config::default());
        let (tx, mut rx) = mpsc::channel(10);
        let _writer = transport.start(tx).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let callback = Callback::new(
            move |outcome: CallbackOutcome| sink.lock().unwrap().push(outcome.is_expired()),
            Duration::from_secs(3),
        );
        transport.write_with_callback(rq_0016(Priority::High), callback).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(transport.callbacks().len(), 1);

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(*calls.lock().unwrap(), [true]);
        assert!(transport.callbacks().is_empty());

        transport.on_line_received(RP_0016);
        assert_eq!(*calls.lock().unwrap(), [true]);
    }

    #[tokio::test]
    async fn test_request_matches_response() {
        let (transport, _clock) = transport(Config::default());
        let (tx, mut rx) = mpsc::channel(10);
        let _writer = transport.start(tx).unwrap();

        let responder = {
            let transport = transport.clone();
            tokio::spawn(async move {
                let line = rx.recv().await.unwrap();
                assert!(line.starts_with("RQ"));
                transport.on_line_received(RP_0016);
            })
        };

        let msg = transport.request(rq_0016(Priority::High)).await.unwrap();
        assert_eq!(msg.verb(), Verb::Response);
        assert_eq!(msg.payload(), "0022");
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_retries_then_expires() {
        let (transport, _clock) = transport(Config::default());
        let (tx, mut rx) = mpsc::channel(10);
        let _writer = transport.start(tx).unwrap();

        let cmd = rq_0016(Priority::High).with_retries(2);
        let err = transport.request(cmd).await.unwrap_err();
        assert!(err.is_expired());
        assert_eq!(err.to_string(), "The callback has expired: 0016|RP|01:145038");

        let mut sent = 0;
        while rx.try_recv().is_ok() {
            sent += 1;
        }
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn test_callback_needs_an_expected_response() {
        let (transport, _clock) = transport(Config::default());
        let cmd = Command::encode(" I", "01:145038", "1FC9", "00", Qos::default()).unwrap();
        let err = transport
            .write_with_callback(cmd, Callback::new(|_| {}, Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
        assert_eq!(Verb::Info.complement(), None);
    }
}

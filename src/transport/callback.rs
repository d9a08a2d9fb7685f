use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use crate::protocol::{Header, Message};

/// Source of the current time for deadlines
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> SystemTime;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        ManualClock { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: SystemTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// What a callback is invoked with
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// A message with the expected header arrived
    Matched(Message),
    /// The deadline passed first
    Expired,
}

impl CallbackOutcome {
    pub fn is_expired(&self) -> bool {
        matches!(self, CallbackOutcome::Expired)
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            CallbackOutcome::Matched(msg) => Some(msg),
            CallbackOutcome::Expired => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(CallbackOutcome) + Send + Sync>;

/// How to handle the response to a command
#[derive(Clone)]
pub struct Callback {
    pub handler: Handler,
    /// Time allowed for a response, counted from transmission; `None` never expires
    pub timeout: Option<Duration>,
    /// Fire on every match and never expire
    pub daemon: bool,
}

impl Callback {
    pub fn new<F>(handler: F, timeout: Duration) -> Self
    where
        F: Fn(CallbackOutcome) + Send + Sync + 'static,
    {
        Callback {
            handler: Arc::new(handler),
            timeout: Some(timeout),
            daemon: false,
        }
    }

    /// A callback that fires on every matching message until deregistered
    pub fn daemon<F>(handler: F) -> Self
    where
        F: Fn(CallbackOutcome) + Send + Sync + 'static,
    {
        Callback {
            handler: Arc::new(handler),
            timeout: None,
            daemon: true,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("timeout", &self.timeout)
            .field("daemon", &self.daemon)
            .finish_non_exhaustive()
    }
}

struct Entry {
    header: Header,
    handler: Handler,
    deadline: Option<SystemTime>,
    daemon: bool,
}

impl Entry {
    fn is_expired(&self, now: SystemTime) -> bool {
        !self.daemon && self.deadline.map_or(false, |deadline| deadline <= now)
    }
}

/// Pending response callbacks, keyed by a per-registration correlation id
///
/// Registration, expiry and matching all take the same lock. Handlers run
/// after it is released.
pub struct CallbackRegistry {
    entries: Mutex<BTreeMap<u64, Entry>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CallbackRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        CallbackRegistry {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Registers a callback for `header`; its deadline starts now
    pub fn register(&self, header: Header, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = callback.timeout.map(|timeout| self.clock.now() + timeout);

        tracing::debug!("Registered callback #{} for {}", id, header);
        self.lock().insert(
            id,
            Entry {
                header,
                handler: callback.handler,
                deadline,
                daemon: callback.daemon,
            },
        );
        id
    }

    /// Removes a callback without invoking it
    pub fn deregister(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Expires one callback, if it is still pending
    pub fn expire(&self, id: u64) -> bool {
        let entry = {
            let mut entries = self.lock();
            match entries.get(&id) {
                Some(entry) if !entry.daemon => entries.remove(&id),
                _ => None,
            }
        };

        match entry {
            Some(entry) => {
                tracing::error!("Expired callback #{} for {}", id, entry.header);
                (entry.handler)(CallbackOutcome::Expired);
                true
            }
            None => false,
        }
    }

    /// Expires every non-daemon callback whose deadline is at or before now
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<(u64, Entry)> = {
            let mut entries = self.lock();
            let ids: Vec<u64> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in &expired {
            tracing::error!("Expired callback #{} for {}", id, entry.header);
            (entry.handler)(CallbackOutcome::Expired);
        }
        expired.len()
    }

    /// Sweeps expired callbacks, then fires those matching the message
    ///
    /// The oldest pending non-daemon callback for the header is fired and
    /// removed, and every daemon for the header is fired. Returns the number
    /// of handlers matched.
    pub fn on_message(&self, msg: &Message) -> usize {
        self.sweep();

        let Some(header) = msg.header() else {
            return 0;
        };

        let handlers: Vec<Handler> = {
            let mut entries = self.lock();
            let oneshot = entries
                .iter()
                .find(|(_, entry)| !entry.daemon && entry.header == header)
                .map(|(id, _)| *id);

            let mut handlers: Vec<Handler> = entries
                .values()
                .filter(|entry| entry.daemon && entry.header == header)
                .map(|entry| entry.handler.clone())
                .collect();
            if let Some(entry) = oneshot.and_then(|id| entries.remove(&id)) {
                handlers.insert(0, entry.handler);
            }
            handlers
        };

        for handler in &handlers {
            tracing::debug!("Callback matched {}", header);
            handler(CallbackOutcome::Matched(msg.clone()));
        }
        handlers.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether any callback is pending for `header`
    pub fn is_pending(&self, header: &Header) -> bool {
        self.lock().values().any(|entry| entry.header == *header)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("pending", &self.len())
            .field("clock", &self.clock)
            .finish()
    }
}

//! Per-job progress fan-out
//!
//! The ProgressBus keeps one channel per job id. Each channel has:
//! - a `broadcast` ring for best-effort progress fan-out (slow subscribers lag
//!   and lose intermediate percent updates, publishers never wait)
//! - a `watch` slot holding the channel's terminal event, so `done`, `error` and
//!   `id_changed` reach every subscriber even after lagging or late attachment
//! - a bounded pending queue used only until the first subscriber attaches, so
//!   the opening events of a job are not lost to the subscribe/publish race
//!
//! Channels may be subscribed before they are opened. A closed channel stays
//! subscribable for a grace period and is then released.

use super::JobEvent;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// ProgressBus sizing and timing
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broadcast ring size per channel
    pub channel_capacity: usize,
    /// Events held before the first subscriber attaches
    pub pending_capacity: usize,
    /// How long a closed channel remains subscribable
    pub close_grace: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            pending_capacity: 64,
            close_grace: Duration::from_secs(5),
        }
    }
}

struct Channel {
    tx: broadcast::Sender<JobEvent>,
    terminal: watch::Sender<Option<JobEvent>>,
    /// `Some` until the first subscriber attaches
    pending: Option<VecDeque<JobEvent>>,
    /// Set by `open_channel`; subscribe-only channels are dropped with their last subscriber
    opened: bool,
    closing: bool,
    generation: u64,
}

impl Channel {
    fn new(capacity: usize, generation: u64) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (terminal, _) = watch::channel(None);
        Self {
            tx,
            terminal,
            pending: Some(VecDeque::new()),
            opened: false,
            closing: false,
            generation,
        }
    }

    fn has_terminal(&self) -> bool {
        self.terminal.borrow().is_some()
    }
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, Channel>,
    next_generation: u64,
}

impl Inner {
    fn fresh_channel(&mut self, capacity: usize) -> Channel {
        self.next_generation += 1;
        Channel::new(capacity, self.next_generation)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Multi-subscriber event channels keyed by job id
///
/// Cloning is cheap; all clones share the same channels.
///
/// # Examples
///
/// ```
/// use stemdeck_common::events::{BusConfig, JobEvent, ProgressBus};
///
/// # #[tokio::main]
/// # async fn main() {
/// let bus = ProgressBus::new(BusConfig::default());
/// bus.open_channel("job-1");
/// bus.publish("job-1", JobEvent::running("vocal_instrumental", 0));
///
/// // First subscriber still sees the event published before it attached
/// let mut sub = bus.subscribe("job-1");
/// assert_eq!(sub.next().await, Some(JobEvent::running("vocal_instrumental", 0)));
/// # }
/// ```
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<Mutex<Inner>>,
    config: BusConfig,
}

impl ProgressBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            config,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Open (or re-open) the channel for a job
    ///
    /// A channel that already carries a terminal event or is closing is
    /// replaced; its existing subscribers finish with that terminal event.
    pub fn open_channel(&self, job_id: &str) {
        let mut inner = lock(&self.inner);
        let stale = inner
            .channels
            .get(job_id)
            .map(|ch| ch.closing || ch.has_terminal())
            .unwrap_or(true);

        if stale {
            let channel = inner.fresh_channel(self.config.channel_capacity);
            inner.channels.insert(job_id.to_string(), channel);
        }

        if let Some(channel) = inner.channels.get_mut(job_id) {
            channel.opened = true;
        }
        debug!(job_id = %job_id, "Progress channel opened");
    }

    /// Publish an event to a job's channel
    ///
    /// Never blocks and never fails: publishing to an unknown channel or a
    /// channel without subscribers is a no-op. Terminal events are routed
    /// through the guaranteed-delivery slot.
    pub fn publish(&self, job_id: &str, event: JobEvent) {
        let mut inner = lock(&self.inner);
        let Some(channel) = inner.channels.get_mut(job_id) else {
            debug!(job_id = %job_id, event = event.event_type(), "No channel for event, dropped");
            return;
        };

        if channel.has_terminal() {
            warn!(
                job_id = %job_id,
                event = event.event_type(),
                "Event published after terminal event, dropped"
            );
            return;
        }

        if event.is_terminal() {
            channel.terminal.send_replace(Some(event.clone()));
            if channel.pending.is_none() {
                let _ = channel.tx.send(event);
            }
            return;
        }

        match channel.pending.as_mut() {
            Some(pending) => {
                if pending.len() < self.config.pending_capacity {
                    pending.push_back(event);
                } else {
                    debug!(job_id = %job_id, "Pending buffer full, progress event dropped");
                }
            }
            None => {
                // Err only means nobody is listening right now
                let _ = channel.tx.send(event);
            }
        }
    }

    /// Subscribe to a job's events
    ///
    /// May be called before `open_channel`. The first subscriber receives the
    /// events buffered since the channel opened; later subscribers only see new
    /// events (plus the terminal event, if one was already published).
    pub fn subscribe(&self, job_id: &str) -> JobSubscription {
        let capacity = self.config.channel_capacity;
        let mut guard = lock(&self.inner);
        let inner = &mut *guard;
        let channel = match inner.channels.entry(job_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                inner.next_generation += 1;
                entry.insert(Channel::new(capacity, inner.next_generation))
            }
        };

        let rx = channel.tx.subscribe();
        let mut backlog = channel.pending.take().unwrap_or_default();
        let terminal = channel.terminal.subscribe();
        if let Some(event) = terminal.borrow().clone() {
            backlog.push_back(event);
        }

        debug!(
            job_id = %job_id,
            replayed = backlog.len(),
            subscribers = channel.tx.receiver_count(),
            "Progress subscriber attached"
        );

        JobSubscription {
            job_id: job_id.to_string(),
            generation: channel.generation,
            rx,
            terminal,
            backlog,
            finished: false,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Close a job's channel
    ///
    /// The channel stays subscribable for the configured grace period so a
    /// reconnecting client still observes the terminal event, then it is
    /// released and remaining subscribers end their streams.
    pub fn close_channel(&self, job_id: &str) {
        let generation = {
            let mut inner = lock(&self.inner);
            match inner.channels.get_mut(job_id) {
                Some(channel) => {
                    channel.closing = true;
                    channel.generation
                }
                None => return,
            }
        };

        let grace = self.config.close_grace;
        let handle = tokio::runtime::Handle::try_current();
        match handle {
            Ok(handle) if !grace.is_zero() => {
                let weak = Arc::downgrade(&self.inner);
                let job_id = job_id.to_string();
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(inner) = weak.upgrade() {
                        release(&inner, &job_id, generation);
                    }
                });
            }
            _ => release(&self.inner, job_id, generation),
        }
    }

    /// Whether a channel currently exists for the job
    pub fn has_channel(&self, job_id: &str) -> bool {
        lock(&self.inner).channels.contains_key(job_id)
    }

    /// Number of live channels, including ones within their close grace
    pub fn channel_count(&self) -> usize {
        lock(&self.inner).channels.len()
    }
}

fn release(inner: &Mutex<Inner>, job_id: &str, generation: u64) {
    let mut inner = lock(inner);
    let current = inner.channels.get(job_id).map(|ch| ch.generation);
    if current == Some(generation) {
        inner.channels.remove(job_id);
        debug!(job_id = %job_id, "Progress channel released");
    }
}

/// One subscriber's view of a job channel
///
/// Yields events in publish order and ends after the channel's terminal event
/// (or when the channel is released).
pub struct JobSubscription {
    job_id: String,
    generation: u64,
    rx: broadcast::Receiver<JobEvent>,
    terminal: watch::Receiver<Option<JobEvent>>,
    backlog: VecDeque<JobEvent>,
    finished: bool,
    bus: Weak<Mutex<Inner>>,
}

impl JobSubscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event, or `None` once the stream has ended
    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(self.deliver(event));
            }
            if self.finished {
                return None;
            }

            tokio::select! {
                biased;
                received = self.rx.recv() => match received {
                    Ok(event) => return Some(self.deliver(event)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(job_id = %self.job_id, skipped, "Subscriber lagged, progress events skipped");
                    }
                    Err(RecvError::Closed) => self.drain_to_terminal(),
                },
                _ = self.terminal.changed() => self.drain_to_terminal(),
            }
        }
    }

    fn deliver(&mut self, event: JobEvent) -> JobEvent {
        if event.is_terminal() {
            self.finished = true;
            self.backlog.clear();
        }
        event
    }

    /// Collect what the ring still holds, then the terminal event, preserving order
    fn drain_to_terminal(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.backlog.push_back(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        let terminal = self.terminal.borrow_and_update().clone();
        if let Some(event) = terminal {
            if !self.backlog.contains(&event) {
                self.backlog.push_back(event);
            }
        }

        if self.backlog.is_empty() {
            self.finished = true;
        }
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        let abandoned = inner
            .channels
            .get(&self.job_id)
            .map(|ch| {
                ch.generation == self.generation && !ch.opened && ch.tx.receiver_count() <= 1
            })
            .unwrap_or(false);
        if abandoned {
            inner.channels.remove(&self.job_id);
            debug!(job_id = %self.job_id, "Unopened progress channel dropped with last subscriber");
        }
    }
}

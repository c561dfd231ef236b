//! Per-user push fabric.
//!
//! Every live subscription is a bounded queue bound to one user. Publish
//! fans an event out to all of that user's subscriptions, stamping each
//! copy with the subscription's own strictly increasing sequence number.
//! A subscriber that cannot drain in time is disconnected; the publisher
//! never blocks.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use careerflow_common::{Envelope, ErrorKind, EventKind, PushConfig, SubscriptionId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Validates a subscriber's auth proof before the subscription goes live.
/// Connections that never present a valid proof never reach the fabric;
/// the transport closes them after its grace window.
#[async_trait]
pub trait SubscriberAuth: Send + Sync {
    async fn authenticate(&self, proof: &str) -> Option<UserId>;
}

#[derive(Debug)]
struct SubChannel {
    id: SubscriptionId,
    user: UserId,
    seq: AtomicU64,
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<ErrorKind>>,
    last_seen: Mutex<Instant>,
}

impl SubChannel {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn offer(&self, event: EventKind) {
        if self.cancel.is_cancelled() {
            return;
        }
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            return;
        };
        let envelope = Envelope {
            seq: self.next_seq(),
            event,
        };
        match tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscription = %self.id, user = %self.user, "subscriber cannot drain, disconnecting");
                drop(guard);
                self.close(Some(ErrorKind::SubscriberBackpressure));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(guard);
                self.close(None);
            }
        }
    }

    fn close(&self, reason: Option<ErrorKind>) {
        if let Some(kind) = reason {
            let mut slot = self.close_reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(kind);
            }
        }
        self.cancel.cancel();
        // Dropping the sender lets the receiver drain what is already
        // queued and then observe end-of-stream.
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

/// One live push connection, bound to a single user.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<SubChannel>,
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.channel.id
    }

    pub fn user(&self) -> UserId {
        self.channel.user
    }

    /// Receive the next envelope. After the fabric disconnects this
    /// subscription, queued events drain first, then an optional terminal
    /// error surfaces, then the stream ends.
    pub async fn next(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.rx.recv().await {
            return Some(envelope);
        }
        let reason = self
            .channel
            .close_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        reason.map(|kind| Envelope {
            seq: self.channel.next_seq(),
            event: EventKind::Error {
                kind,
                message: kind.as_str().to_string(),
            },
        })
    }

    /// Client heartbeat: refreshes the idle clock and answers with `pong`.
    pub fn ping(&self) {
        self.channel.touch();
        self.channel.offer(EventKind::Pong);
    }

    pub fn close(&self) {
        self.channel.close(None);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.close(None);
    }
}

/// Per-user topic bus.
pub struct PushFabric {
    config: PushConfig,
    auth: Arc<dyn SubscriberAuth>,
    subscriptions: RwLock<HashMap<UserId, Vec<Arc<SubChannel>>>>,
}

impl PushFabric {
    pub fn new(config: PushConfig, auth: Arc<dyn SubscriberAuth>) -> Self {
        Self {
            config,
            auth,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Authenticated subscription entry point.
    pub async fn subscribe(&self, proof: &str) -> EngineResult<Subscription> {
        let Some(user) = self.auth.authenticate(proof).await else {
            return Err(EngineError::Unauthorized(
                "subscription auth proof rejected".into(),
            ));
        };
        Ok(self.attach(user))
    }

    /// Pre-authenticated attachment, used internally for turn and goal
    /// streams. The caller vouches for the user id.
    pub fn attach(&self, user: UserId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let channel = Arc::new(SubChannel {
            id: SubscriptionId::new(),
            user,
            seq: AtomicU64::new(0),
            tx: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        });

        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user)
            .or_default()
            .push(Arc::clone(&channel));

        debug!(subscription = %channel.id, %user, "subscription attached");
        Subscription { channel, rx }
    }

    /// Fan an event out to every live subscription of `user`.
    /// O(subscriptions); never blocks on a slow subscriber.
    pub fn publish(&self, user: UserId, event: EventKind) {
        let channels: Vec<Arc<SubChannel>> = {
            let table = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            table.get(&user).cloned().unwrap_or_default()
        };

        let mut saw_closed = false;
        for channel in &channels {
            channel.offer(event.clone());
            saw_closed |= channel.is_closed();
        }
        if saw_closed {
            self.prune(user);
        }
    }

    /// Disconnect subscriptions idle past twice the heartbeat interval.
    pub fn sweep_idle(&self) {
        let cutoff = self.config.idle_cutoff();
        let users: Vec<UserId> = {
            let table = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            table.keys().copied().collect()
        };
        for user in users {
            let channels: Vec<Arc<SubChannel>> = {
                let table = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
                table.get(&user).cloned().unwrap_or_default()
            };
            for channel in channels {
                if channel.idle_for() > cutoff {
                    info!(subscription = %channel.id, %user, "closing idle subscription");
                    channel.close(None);
                }
            }
            self.prune(user);
        }
    }

    /// Periodic idle sweep, one task per fabric.
    pub fn spawn_heartbeat_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let fabric = Arc::clone(self);
        let period = Duration::from_secs(self.config.heartbeat_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                fabric.sweep_idle();
            }
        })
    }

    pub fn live_subscriptions(&self, user: UserId) -> usize {
        let table = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
        table
            .get(&user)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn prune(&self, user: UserId) {
        let mut table = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(subs) = table.get_mut(&user) {
            subs.retain(|s| !s.is_closed());
            if subs.is_empty() {
                table.remove(&user);
            }
        }
    }
}

/// Publish handle for one orchestration scope (a turn, a goal run).
///
/// Every event fans out to the user's live subscriptions; scopes that
/// hand a stream back to their caller additionally mirror events into
/// that scope's own channel, so one turn's `done` never terminates
/// another scope's stream.
#[derive(Clone)]
pub struct UserBus {
    fabric: Arc<PushFabric>,
    user: UserId,
    scope: Option<mpsc::Sender<EventKind>>,
}

impl UserBus {
    /// Fabric-only bus: events reach subscribers but no scoped stream.
    pub fn new(fabric: Arc<PushFabric>, user: UserId) -> Self {
        Self {
            fabric,
            user,
            scope: None,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn emit(&self, event: EventKind) {
        if let Some(scope) = &self.scope {
            // The scope owner not draining its own stream only loses its
            // private copy; subscribers are unaffected.
            let _ = scope.try_send(event.clone());
        }
        self.fabric.publish(self.user, event);
    }
}

impl PushFabric {
    /// A bus plus the scoped stream mirroring everything it emits.
    pub fn scoped_bus(self: &Arc<Self>, user: UserId) -> (UserBus, EventStream) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let bus = UserBus {
            fabric: Arc::clone(self),
            user,
            scope: Some(tx),
        };
        (bus, EventStream::new(rx))
    }
}

/// A scoped event stream (one turn, one goal run) that terminates after
/// the `done` event. Sequence numbers are scope-local, starting at 1.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<EventKind>,
    seq: u64,
    finished: bool,
}

impl EventStream {
    fn new(rx: mpsc::Receiver<EventKind>) -> Self {
        Self {
            rx,
            seq: 0,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<Envelope> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await?;
        if matches!(event, EventKind::Done) {
            self.finished = true;
        }
        self.seq += 1;
        Some(Envelope {
            seq: self.seq,
            event,
        })
    }

    /// Drain the remaining events through `done`.
    pub async fn collect(mut self) -> Vec<Envelope> {
        let mut events = Vec::new();
        while let Some(envelope) = self.next().await {
            events.push(envelope);
        }
        events
    }
}

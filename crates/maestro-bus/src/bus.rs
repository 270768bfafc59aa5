use crate::handoff::{HandoffBox, TaskHandoff};
use crate::message::{AgentMessage, MessageType};
use crate::shared::{DataShare, DataShareStore};
use chrono::{DateTime, Utc};
use maestro_core::{BusConfig, MaestroError, MaestroResult, Priority};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback invoked synchronously for every delivered message.
pub type MessageCallback = Arc<dyn Fn(&AgentMessage) + Send + Sync>;

/// Point-in-time counters for the bus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Registered mailboxes.
    pub mailboxes: usize,
    /// Unexpired messages across all mailboxes.
    pub queued_messages: usize,
    /// Live shared data entries.
    pub shared_data_entries: usize,
    /// Handoffs waiting to be accepted.
    pub pending_handoffs: usize,
    /// Messages accepted by `send`.
    pub messages_sent: u64,
    /// Of those, broadcasts.
    pub broadcasts_sent: u64,
    /// Messages evicted from full mailboxes.
    pub messages_dropped: u64,
}

struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-memory message routing, shared data and task handoffs between agents.
///
/// The bus knows nothing about tasks or workflows; payloads are opaque JSON.
pub struct CommunicationBus {
    config: BusConfig,
    mailboxes: Mutex<HashMap<String, VecDeque<AgentMessage>>>,
    subscribers: RwLock<HashMap<String, Vec<MessageCallback>>>,
    broadcast_subscribers: RwLock<Vec<MessageCallback>>,
    shared: DataShareStore,
    handoffs: HandoffBox,
    messages_sent: AtomicU64,
    broadcasts_sent: AtomicU64,
    messages_dropped: AtomicU64,
    sweeper: Mutex<Option<Sweeper>>,
}

impl CommunicationBus {
    /// A bus with no mailboxes and no sweeper running.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            mailboxes: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            broadcast_subscribers: RwLock::new(Vec::new()),
            shared: DataShareStore::new(),
            handoffs: HandoffBox::new(),
            messages_sent: AtomicU64::new(0),
            broadcasts_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Settings the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Spawn the periodic expiry sweep. Calling `start` on a running bus is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let bus = Arc::clone(self);
        let child = token.clone();
        let interval = self.config.cleanup_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        bus.cleanup_expired();
                    }
                }
            }
            debug!("Bus sweeper stopped");
        });
        *sweeper = Some(Sweeper { token, handle });
        info!(interval_secs = interval.as_secs(), "Communication bus started");
    }

    /// Stop the sweep and wait for it to exit.
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.token.cancel();
            if let Err(e) = sweeper.handle.await {
                warn!(error = %e, "Bus sweeper task ended abnormally");
            }
            info!("Communication bus stopped");
        }
    }

    /// Whether the sweeper is running.
    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    /// Create an empty mailbox for `agent_id` so it receives broadcasts.
    pub fn register_agent(&self, agent_id: &str) -> MaestroResult<()> {
        validate_agent_id(agent_id)?;
        self.mailboxes
            .lock()
            .entry(agent_id.to_string())
            .or_default();
        Ok(())
    }

    /// Remove the agent's mailbox and callbacks. Unknown ids are ignored.
    pub fn unregister_agent(&self, agent_id: &str) {
        self.mailboxes.lock().remove(agent_id);
        self.subscribers.write().remove(agent_id);
    }

    /// Register a callback for messages delivered to `agent_id`.
    pub fn subscribe(
        &self,
        agent_id: &str,
        callback: impl Fn(&AgentMessage) + Send + Sync + 'static,
    ) -> MaestroResult<()> {
        self.register_agent(agent_id)?;
        self.subscribers
            .write()
            .entry(agent_id.to_string())
            .or_default()
            .push(Arc::new(callback));
        Ok(())
    }

    /// Register a callback for every broadcast.
    pub fn subscribe_broadcast(&self, callback: impl Fn(&AgentMessage) + Send + Sync + 'static) {
        self.broadcast_subscribers.write().push(Arc::new(callback));
    }

    /// Drop every callback registered for `agent_id`.
    pub fn unsubscribe(&self, agent_id: &str) {
        self.subscribers.write().remove(agent_id);
    }

    /// Route a message. Direct messages land in the recipient's mailbox;
    /// broadcasts land in every mailbox except the sender's.
    pub fn send(&self, message: AgentMessage) -> MaestroResult<Uuid> {
        validate_agent_id(&message.sender)?;
        if message.is_expired_at(Utc::now()) {
            return Err(MaestroError::Bus(format!(
                "message {} expired before it was sent",
                message.id
            )));
        }
        let id = message.id;
        match message.recipient.clone() {
            Some(recipient) => self.deliver_direct(&recipient, message)?,
            None => self.deliver_broadcast(message),
        }
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn deliver_direct(&self, recipient: &str, message: AgentMessage) -> MaestroResult<()> {
        validate_agent_id(recipient)?;
        self.push(recipient, message.clone());
        debug!(
            message_id = %message.id,
            sender = %message.sender,
            recipient = %recipient,
            message_type = %message.message_type,
            "Delivered message"
        );

        // Clone out of the lock so callbacks may call back into the bus.
        let callbacks: Vec<MessageCallback> = self
            .subscribers
            .read()
            .get(recipient)
            .cloned()
            .unwrap_or_default();
        for callback in &callbacks {
            callback(&message);
        }
        Ok(())
    }

    fn deliver_broadcast(&self, message: AgentMessage) {
        let recipients: Vec<String> = {
            let mut mailboxes = self.mailboxes.lock();
            let mut recipients = Vec::new();
            for (agent_id, mailbox) in mailboxes.iter_mut() {
                if *agent_id == message.sender {
                    continue;
                }
                mailbox.push_back(message.clone());
                if mailbox.len() > self.config.max_mailbox_size {
                    mailbox.pop_front();
                    self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
                recipients.push(agent_id.clone());
            }
            recipients
        };
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id = %message.id,
            sender = %message.sender,
            recipients = recipients.len(),
            message_type = %message.message_type,
            "Broadcast message"
        );

        let callbacks: Vec<MessageCallback> = self.broadcast_subscribers.read().clone();
        for callback in &callbacks {
            callback(&message);
        }
    }

    fn push(&self, agent_id: &str, message: AgentMessage) {
        let mut mailboxes = self.mailboxes.lock();
        let mailbox = mailboxes.entry(agent_id.to_string()).or_default();
        mailbox.push_back(message);
        if mailbox.len() > self.config.max_mailbox_size {
            mailbox.pop_front();
            self.messages_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(agent_id = %agent_id, "Mailbox full, dropped oldest message");
        }
    }

    /// The most recent `limit` live messages for `agent_id`, in send order.
    /// The mailbox is left untouched.
    pub fn get_messages(&self, agent_id: &str, limit: usize) -> Vec<AgentMessage> {
        let now = Utc::now();
        let mailboxes = self.mailboxes.lock();
        let Some(mailbox) = mailboxes.get(agent_id) else {
            return Vec::new();
        };
        let live: Vec<&AgentMessage> = mailbox.iter().filter(|m| !m.is_expired_at(now)).collect();
        let skip = live.len().saturating_sub(limit);
        live.into_iter().skip(skip).cloned().collect()
    }

    /// Remove and return every live message for `agent_id`, in send order.
    pub fn drain_messages(&self, agent_id: &str) -> Vec<AgentMessage> {
        let now = Utc::now();
        let mut mailboxes = self.mailboxes.lock();
        let Some(mailbox) = mailboxes.get_mut(agent_id) else {
            return Vec::new();
        };
        mailbox.drain(..).filter(|m| !m.is_expired_at(now)).collect()
    }

    /// Publish data for other agents. `ttl_seconds` falls back to the
    /// configured default.
    pub fn share_data(
        &self,
        source_agent: &str,
        data_type: &str,
        data: serde_json::Value,
        ttl_seconds: Option<u64>,
    ) -> MaestroResult<Uuid> {
        validate_agent_id(source_agent)?;
        if data_type.trim().is_empty() {
            return Err(MaestroError::Validation(
                "data_type must not be empty".into(),
            ));
        }
        let ttl = ttl_seconds.unwrap_or(self.config.default_ttl_secs);
        let share = DataShare::new(source_agent, data_type, data, ttl);
        let id = self.shared.insert(share);
        debug!(data_share_id = %id, source_agent, data_type, ttl_secs = ttl, "Shared data");

        let notice = AgentMessage::new(
            MessageType::DataShare,
            source_agent,
            None,
            serde_json::json!({ "data_share_id": id, "data_type": data_type }),
        );
        self.deliver_broadcast(notice);
        Ok(id)
    }

    /// A shared entry by id, unless it has expired.
    pub fn get_shared_data(&self, id: Uuid) -> Option<DataShare> {
        self.shared.get(id)
    }

    /// Unexpired entries of `data_type`, optionally from one source, oldest first.
    pub fn get_shared_data_by_type(
        &self,
        data_type: &str,
        source_agent: Option<&str>,
    ) -> Vec<DataShare> {
        self.shared.by_type(data_type, source_agent)
    }

    /// Offer a task directly to `target`. The target is notified with a
    /// `task_handoff` message.
    pub fn handoff_task(
        &self,
        source: &str,
        target: &str,
        task_type: &str,
        payload: serde_json::Value,
        priority: Priority,
        deadline: Option<DateTime<Utc>>,
    ) -> MaestroResult<Uuid> {
        validate_agent_id(source)?;
        validate_agent_id(target)?;
        let handoff = TaskHandoff {
            id: Uuid::new_v4(),
            source_agent: source.to_string(),
            target_agent: target.to_string(),
            task_type: task_type.to_string(),
            payload,
            priority,
            deadline,
            created_at: Utc::now(),
        };
        let id = handoff.id;
        self.handoffs.insert(handoff);
        info!(handoff_id = %id, source, target, task_type, "Task handed off");

        let notice = AgentMessage::direct(
            MessageType::TaskHandoff,
            source,
            target,
            serde_json::json!({ "handoff_id": id, "task_type": task_type }),
        )
        .with_priority(priority);
        self.deliver_direct(target, notice)?;
        Ok(id)
    }

    /// Unaccepted, unexpired handoffs addressed to `target`.
    pub fn get_pending_handoffs(&self, target: &str) -> Vec<TaskHandoff> {
        self.handoffs.pending_for(target, Utc::now())
    }

    /// Claim a pending handoff. A second call for the same id fails.
    pub fn accept_handoff(&self, id: Uuid) -> MaestroResult<TaskHandoff> {
        let handoff = self.handoffs.take(id, Utc::now())?;
        info!(handoff_id = %id, target = %handoff.target_agent, "Handoff accepted");
        Ok(handoff)
    }

    /// Remove expired shared data, expired messages and overdue handoffs.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub(crate) fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let shared = self.shared.purge_expired(now);
        let handoffs = self.handoffs.purge_overdue(now);
        let mut messages = 0;
        for mailbox in self.mailboxes.lock().values_mut() {
            let before = mailbox.len();
            mailbox.retain(|m| !m.is_expired_at(now));
            messages += before - mailbox.len();
        }
        let total = shared + handoffs + messages;
        if total > 0 {
            debug!(shared, handoffs, messages, "Bus cleanup removed expired entries");
        }
        total
    }

    /// Current counters.
    pub fn get_stats(&self) -> BusStats {
        let (mailboxes, queued_messages) = {
            let mailboxes = self.mailboxes.lock();
            (
                mailboxes.len(),
                mailboxes.values().map(VecDeque::len).sum(),
            )
        };
        BusStats {
            mailboxes,
            queued_messages,
            shared_data_entries: self.shared.len(),
            pending_handoffs: self.handoffs.len(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for CommunicationBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

fn validate_agent_id(agent_id: &str) -> MaestroResult<()> {
    if agent_id.trim().is_empty() {
        return Err(MaestroError::Validation("agent id must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn bus() -> CommunicationBus {
        CommunicationBus::default()
    }

    #[test]
    fn test_direct_message_preserves_order() {
        let bus = bus();
        for i in 0..5 {
            bus.send(AgentMessage::direct(MessageType::Request, "a", "b", json!(i)))
                .unwrap();
        }
        let msgs = bus.get_messages("b", 10);
        let payloads: Vec<i64> = msgs.iter().map(|m| m.payload.as_i64().unwrap()).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_get_messages_limit_returns_most_recent() {
        let bus = bus();
        for i in 0..5 {
            bus.send(AgentMessage::direct(MessageType::Notification, "a", "b", json!(i)))
                .unwrap();
        }
        let msgs = bus.get_messages("b", 2);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].payload, json!(3));
        assert_eq!(msgs[1].payload, json!(4));
        // Non-destructive
        assert_eq!(bus.get_messages("b", 10).len(), 5);
    }

    #[test]
    fn test_drain_is_destructive() {
        let bus = bus();
        bus.send(AgentMessage::direct(MessageType::Request, "a", "b", json!(1)))
            .unwrap();
        assert_eq!(bus.drain_messages("b").len(), 1);
        assert!(bus.drain_messages("b").is_empty());
        assert!(bus.get_messages("b", 10).is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let bus = bus();
        for agent in ["a", "b", "c"] {
            bus.register_agent(agent).unwrap();
        }
        bus.send(AgentMessage::broadcast("a", json!("hi"))).unwrap();
        assert!(bus.get_messages("a", 10).is_empty());
        assert_eq!(bus.get_messages("b", 10).len(), 1);
        assert_eq!(bus.get_messages("c", 10).len(), 1);
    }

    #[test]
    fn test_callbacks_fire() {
        let bus = bus();
        let direct = Arc::new(AtomicUsize::new(0));
        let broadcast = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&direct);
        bus.subscribe("b", move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let b = Arc::clone(&broadcast);
        bus.subscribe_broadcast(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        bus.send(AgentMessage::direct(MessageType::Request, "a", "b", json!(1)))
            .unwrap();
        bus.send(AgentMessage::direct(MessageType::Request, "a", "c", json!(1)))
            .unwrap();
        bus.send(AgentMessage::broadcast("a", json!(2))).unwrap();

        assert_eq!(direct.load(Ordering::SeqCst), 1);
        assert_eq!(broadcast.load(Ordering::SeqCst), 1);

        bus.unsubscribe("b");
        bus.send(AgentMessage::direct(MessageType::Request, "a", "b", json!(1)))
            .unwrap();
        assert_eq!(direct.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mailbox_cap_drops_oldest() {
        let bus = CommunicationBus::new(BusConfig {
            max_mailbox_size: 2,
            ..BusConfig::default()
        });
        for i in 0..3 {
            bus.send(AgentMessage::direct(MessageType::Request, "a", "b", json!(i)))
                .unwrap();
        }
        let msgs = bus.get_messages("b", 10);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].payload, json!(1));
        assert_eq!(bus.get_stats().messages_dropped, 1);
    }

    #[test]
    fn test_expired_messages_hidden_and_swept() {
        let bus = bus();
        let msg = AgentMessage::direct(MessageType::Notification, "a", "b", json!(1))
            .expires_in(Duration::from_secs(60));
        bus.send(msg).unwrap();
        bus.send(AgentMessage::direct(MessageType::Notification, "a", "b", json!(2)))
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(bus.cleanup_expired_at(later), 1);
        assert_eq!(bus.get_messages("b", 10).len(), 1);
    }

    #[test]
    fn test_rejects_empty_sender_and_expired_message() {
        let bus = bus();
        let err = bus
            .send(AgentMessage::direct(MessageType::Request, "", "b", json!(1)))
            .unwrap_err();
        assert!(matches!(err, MaestroError::Validation(_)));

        let expired = AgentMessage::direct(MessageType::Request, "a", "b", json!(1))
            .expires_in(Duration::ZERO);
        assert!(bus.send(expired).is_err());
    }

    #[test]
    fn test_share_data_notifies_and_reads() {
        let bus = bus();
        bus.register_agent("reader").unwrap();
        let id = bus
            .share_data("writer", "draft", json!({"text": "hi"}), Some(60))
            .unwrap();
        assert_eq!(bus.get_shared_data(id).unwrap().data["text"], "hi");
        assert_eq!(bus.get_shared_data_by_type("draft", Some("writer")).len(), 1);

        let notices = bus.get_messages("reader", 10);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message_type, MessageType::DataShare);
    }

    #[test]
    fn test_share_data_default_ttl() {
        let bus = bus();
        let id = bus.share_data("w", "t", json!(null), None).unwrap();
        assert_eq!(bus.get_shared_data(id).unwrap().ttl_seconds, 3600);
        assert!(bus.share_data("w", " ", json!(null), None).is_err());
    }

    #[test]
    fn test_handoff_accept_once() {
        let bus = bus();
        let id = bus
            .handoff_task("planner", "writer", "draft", json!({}), Priority::High, None)
            .unwrap();
        assert_eq!(bus.get_pending_handoffs("writer").len(), 1);
        let notices = bus.get_messages("writer", 10);
        assert_eq!(notices[0].message_type, MessageType::TaskHandoff);

        let handoff = bus.accept_handoff(id).unwrap();
        assert_eq!(handoff.task_type, "draft");
        assert!(bus.accept_handoff(id).is_err());
        assert!(bus.get_pending_handoffs("writer").is_empty());
    }

    #[test]
    fn test_stats() {
        let bus = bus();
        bus.register_agent("a").unwrap();
        bus.send(AgentMessage::direct(MessageType::Request, "x", "a", json!(1)))
            .unwrap();
        bus.send(AgentMessage::broadcast("x", json!(1))).unwrap();
        let stats = bus.get_stats();
        assert_eq!(stats.mailboxes, 1);
        assert_eq!(stats.queued_messages, 2);
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.broadcasts_sent, 1);
    }

    #[tokio::test]
    async fn test_start_stop_sweeper() {
        let bus = Arc::new(CommunicationBus::new(BusConfig {
            cleanup_interval_secs: 1,
            ..BusConfig::default()
        }));
        bus.start();
        bus.start();
        assert!(bus.is_running());
        bus.stop().await;
        assert!(!bus.is_running());
    }
}

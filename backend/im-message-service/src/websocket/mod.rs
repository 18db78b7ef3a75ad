use crate::config::HubConfig;
use crate::error::{AppError, AppResult};
pub use message_types::{event_types, Envelope, WsInboundEvent};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

pub mod message_types;

/// Unique identifier for one live session
///
/// A user may hold several sessions at once (one per device or tab). The id
/// lets a closing socket remove exactly its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub online_users: usize,
    pub sessions: usize,
}

enum Command {
    Register {
        user_id: i64,
        reply: oneshot::Sender<(SessionId, mpsc::Receiver<String>)>,
    },
    Unregister {
        session_id: SessionId,
    },
    Touch {
        session_id: SessionId,
    },
    SendToUser {
        user_id: i64,
        frame: String,
        reply: oneshot::Sender<bool>,
    },
    IsOnline {
        user_id: i64,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<ConnectionStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Session {
    user_id: i64,
    sender: mpsc::Sender<String>,
    last_seen: Instant,
}

/// Owner of all live sessions.
///
/// Runs as a single task; everything else talks to it through a
/// [`ConnectionRegistry`] handle. Dropping a session's sender closes its
/// outbound stream, which stops the socket actor on the other end.
pub struct Hub {
    config: HubConfig,
    sessions: HashMap<SessionId, Session>,
    users: HashMap<i64, HashSet<SessionId>>,
    commands: mpsc::Receiver<Command>,
}

impl Hub {
    fn new(config: HubConfig) -> (Self, ConnectionRegistry) {
        let (tx, rx) = mpsc::channel(config.command_queue.max(1));
        let hub = Self {
            config,
            sessions: HashMap::new(),
            users: HashMap::new(),
            commands: rx,
        };
        (hub, ConnectionRegistry { commands: tx })
    }

    /// Start the hub task and return the handle used to reach it.
    pub fn spawn(config: HubConfig) -> (ConnectionRegistry, JoinHandle<()>) {
        let (hub, registry) = Self::new(config);
        let handle = tokio::spawn(hub.run());
        (registry, handle)
    }

    async fn run(mut self) {
        let mut reaper = tokio::time::interval(self.config.reap_interval);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        reaper.tick().await;

        tracing::info!(
            reap_interval_secs = self.config.reap_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "connection hub started"
        );

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.close_all();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => {
                        self.close_all();
                        break;
                    }
                },
                _ = reaper.tick() => {
                    self.reap(Instant::now());
                }
            }
        }

        tracing::info!("connection hub stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { user_id, reply } => {
                let (session_id, rx) = self.register(user_id);
                if reply.send((session_id, rx)).is_err() {
                    // Caller went away before the session was handed over.
                    self.unregister(session_id);
                }
            }
            Command::Unregister { session_id } => {
                self.unregister(session_id);
            }
            Command::Touch { session_id } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.last_seen = Instant::now();
                }
            }
            Command::SendToUser {
                user_id,
                frame,
                reply,
            } => {
                let delivered = self.send_to_user(user_id, &frame);
                let _ = reply.send(delivered);
            }
            Command::IsOnline { user_id, reply } => {
                let _ = reply.send(self.users.contains_key(&user_id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { reply } => {
                self.close_all();
                let _ = reply.send(());
            }
        }
    }

    fn register(&mut self, user_id: i64) -> (SessionId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let session_id = SessionId::new();

        self.sessions.insert(
            session_id,
            Session {
                user_id,
                sender: tx,
                last_seen: Instant::now(),
            },
        );
        let user_sessions = self.users.entry(user_id).or_default();
        user_sessions.insert(session_id);

        tracing::debug!(
            user_id,
            %session_id,
            user_sessions = user_sessions.len(),
            "session registered"
        );
        (session_id, rx)
    }

    /// Idempotent; unknown ids are ignored.
    fn unregister(&mut self, session_id: SessionId) -> bool {
        let Some(session) = self.sessions.remove(&session_id) else {
            return false;
        };
        if let Some(ids) = self.users.get_mut(&session.user_id) {
            ids.remove(&session_id);
            if ids.is_empty() {
                self.users.remove(&session.user_id);
            }
        }
        tracing::debug!(user_id = session.user_id, %session_id, "session unregistered");
        true
    }

    /// Offer `frame` to every session of `user_id` without waiting.
    ///
    /// A session whose queue is full or closed is evicted. Returns true if at
    /// least one session accepted the frame.
    fn send_to_user(&mut self, user_id: i64, frame: &str) -> bool {
        let Some(ids) = self.users.get(&user_id) else {
            return false;
        };

        let mut delivered = false;
        let mut evicted = Vec::new();
        for session_id in ids {
            let Some(session) = self.sessions.get(session_id) else {
                continue;
            };
            match session.sender.try_send(frame.to_string()) {
                Ok(()) => delivered = true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(user_id, %session_id, "outbound queue full, evicting session");
                    evicted.push(*session_id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*session_id),
            }
        }

        for session_id in evicted {
            self.unregister(session_id);
        }
        delivered
    }

    fn reap(&mut self, now: Instant) -> usize {
        let stale_after = self.config.stale_after;
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen) > stale_after)
            .map(|(id, _)| *id)
            .collect();

        for session_id in &stale {
            self.unregister(*session_id);
        }
        if !stale.is_empty() {
            tracing::info!(evicted = stale.len(), "reaped idle sessions");
        }
        stale.len()
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            online_users: self.users.len(),
            sessions: self.sessions.len(),
        }
    }

    fn close_all(&mut self) {
        let sessions = self.sessions.len();
        self.sessions.clear();
        self.users.clear();
        tracing::info!(sessions, "closed all sessions");
    }
}

fn hub_stopped() -> AppError {
    AppError::ServiceUnavailable("connection hub stopped".into())
}

/// Cloneable handle to the [`Hub`] task.
#[derive(Clone)]
pub struct ConnectionRegistry {
    commands: mpsc::Sender<Command>,
}

impl ConnectionRegistry {
    /// Add a session for `user_id`.
    ///
    /// Returns the session id (used for cleanup) and the receiver the socket
    /// writer drains. The receiver ends when the hub evicts the session.
    pub async fn register(&self, user_id: i64) -> AppResult<(SessionId, mpsc::Receiver<String>)> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Register { user_id, reply })
            .await
            .map_err(|_| hub_stopped())?;
        rx.await.map_err(|_| hub_stopped())
    }

    pub async fn unregister(&self, session_id: SessionId) {
        let _ = self
            .commands
            .send(Command::Unregister { session_id })
            .await;
    }

    /// Refresh a session's last activity. Never blocks; dropped if the hub is busy.
    pub fn touch(&self, session_id: SessionId) {
        if let Err(TrySendError::Full(_)) = self.commands.try_send(Command::Touch { session_id }) {
            tracing::debug!(%session_id, "hub busy, heartbeat dropped");
        }
    }

    /// Push `{type, content}` to every live session of `user_id`.
    pub async fn send_to_user(&self, user_id: i64, event_type: &str, content: serde_json::Value) -> bool {
        match Envelope::new(event_type, content).to_frame() {
            Ok(frame) => self.send_frame(user_id, frame).await,
            Err(e) => {
                tracing::warn!(error = %e, event_type, "failed to encode frame");
                false
            }
        }
    }

    pub async fn send_frame(&self, user_id: i64, frame: String) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::SendToUser {
                user_id,
                frame,
                reply,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::IsOnline { user_id, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn stats(&self) -> ConnectionStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats { reply }).await.is_err() {
            return ConnectionStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Close every session and stop the hub task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(outbound_queue: usize) -> HubConfig {
        HubConfig {
            outbound_queue,
            ..HubConfig::default()
        }
    }

    #[tokio::test]
    async fn fans_out_to_every_session_of_a_user() {
        let (mut hub, _registry) = Hub::new(config(8));
        let (_a, mut rx_a) = hub.register(1);
        let (_b, mut rx_b) = hub.register(1);
        let (_c, mut rx_c) = hub.register(2);

        assert!(hub.send_to_user(1, "frame"));
        assert_eq!(rx_a.recv().await.as_deref(), Some("frame"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("frame"));
        assert!(rx_c.try_recv().is_err());
        assert_eq!(
            hub.stats(),
            ConnectionStats {
                online_users: 2,
                sessions: 3
            }
        );
    }

    #[tokio::test]
    async fn full_queue_evicts_only_that_session() {
        let (mut hub, _registry) = Hub::new(config(1));
        let (slow, _slow_rx) = hub.register(1);
        let (_fast, mut fast_rx) = hub.register(1);

        assert!(hub.send_to_user(1, "one"));
        assert_eq!(fast_rx.recv().await.as_deref(), Some("one"));

        // slow never drained: its single slot is still taken
        assert!(hub.send_to_user(1, "two"));
        assert!(!hub.sessions.contains_key(&slow));
        assert_eq!(hub.stats().sessions, 1);
        assert_eq!(fast_rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (mut hub, _registry) = Hub::new(config(4));
        let (id, _rx) = hub.register(9);
        assert!(hub.unregister(id));
        assert!(!hub.unregister(id));
        assert!(!hub.users.contains_key(&9));
        assert!(!hub.send_to_user(9, "gone"));
    }

    #[tokio::test]
    async fn reap_evicts_idle_sessions() {
        let (mut hub, _registry) = Hub::new(HubConfig {
            stale_after: Duration::from_secs(300),
            ..HubConfig::default()
        });
        let (idle, mut idle_rx) = hub.register(1);
        let (active, _active_rx) = hub.register(2);

        let later = Instant::now() + Duration::from_secs(200);
        assert_eq!(hub.reap(later), 0);

        let much_later = Instant::now() + Duration::from_secs(400);
        hub.sessions.get_mut(&active).unwrap().last_seen = much_later - Duration::from_secs(10);
        assert_eq!(hub.reap(much_later), 1);
        assert!(!hub.sessions.contains_key(&idle));
        assert_eq!(hub.stats().sessions, 1);
        // evicted session's stream is closed
        assert_eq!(idle_rx.recv().await, None);
    }
}

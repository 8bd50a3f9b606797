//! Per-user menu sessions and the idle reaper.

use crate::config::LimitsConfig;
use crate::menu::Menu;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pb_channels::{ChatId, InboundMessage, MessageId, UserId};
use pb_render::RenderConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Messages a user can type ahead while a prompt is being re-rendered.
const INPUT_BUFFER: usize = 8;

/// Sending side of an active input capture.
///
/// Only the registry's copy of a session should hold this; once every copy
/// is dropped the capture sees its channels close and gives up.
#[derive(Debug, Clone)]
pub struct InputHandle {
    id: Uuid,
    input: mpsc::Sender<InboundMessage>,
    quit: mpsc::Sender<()>,
}

/// Receiving side, owned by the task running the capture.
#[derive(Debug)]
pub struct InputReceivers {
    pub input: mpsc::Receiver<InboundMessage>,
    pub quit: mpsc::Receiver<()>,
}

impl InputHandle {
    pub fn channel() -> (Self, InputReceivers) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (quit_tx, quit_rx) = mpsc::channel(1);
        (
            Self {
                id: Uuid::new_v4(),
                input: input_tx,
                quit: quit_tx,
            },
            InputReceivers {
                input: input_rx,
                quit: quit_rx,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hand a typed message to the capture. Returns the message back when
    /// the capture is gone.
    pub async fn forward(&self, message: InboundMessage) -> Result<(), InboundMessage> {
        self.input.send(message).await.map_err(|e| e.0)
    }

    /// Ask the capture to stop. Never waits.
    pub fn cancel(&self) -> Result<(), TrySendError<()>> {
        self.quit.try_send(())
    }
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    InMenu,
    InInputDialog(InputHandle),
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    /// The one message edited in place to show the menu.
    pub menu_message_id: MessageId,
    pub state: SessionState,
    pub image_path: PathBuf,
    pub config: RenderConfig,
    pub menu: Menu,
    pub created_at: DateTime<Utc>,
    last_activity: Instant,
}

impl Session {
    pub fn new(
        user_id: UserId,
        menu_message_id: MessageId,
        image_path: impl Into<PathBuf>,
        config: RenderConfig,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            user_id,
            menu_message_id,
            state: SessionState::InMenu,
            image_path: image_path.into(),
            menu: Menu::new(&config, limits),
            config,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    /// Private chats share their id with the user.
    pub fn chat_id(&self) -> ChatId {
        ChatId::from(self.user_id)
    }

    pub fn input_handle(&self) -> Option<&InputHandle> {
        match &self.state {
            SessionState::InInputDialog(handle) => Some(handle),
            SessionState::InMenu => None,
        }
    }

    pub fn set_config(&mut self, config: RenderConfig, limits: &LimitsConfig) {
        self.config = config;
        self.menu = Menu::new(&config, limits);
    }
}

/// Live sessions keyed by user. Every operation holds a shard lock only for
/// the duration of a map access.
pub struct SessionRegistry {
    sessions: DashMap<UserId, Session>,
    timeout: Duration,
    shutdown: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
            shutdown: CancellationToken::new(),
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Insert or replace the session of `user_id`, returning the old one.
    pub fn set(&self, user_id: UserId, mut session: Session) -> Option<Session> {
        session.last_activity = Instant::now();
        self.sessions.insert(user_id, session)
    }

    /// A copy of the session; counts as activity.
    pub fn get(&self, user_id: UserId) -> Option<Session> {
        let mut entry = self.sessions.get_mut(&user_id)?;
        entry.last_activity = Instant::now();
        Some(entry.clone())
    }

    pub fn remove(&self, user_id: UserId) -> Option<Session> {
        self.sessions.remove(&user_id).map(|(_, session)| session)
    }

    /// Remove the session of `user_id` only if it still shows
    /// `menu_message_id`. Of several callers racing on one menu, at most one
    /// gets the session.
    pub fn take_menu(&self, user_id: UserId, menu_message_id: MessageId) -> Option<Session> {
        self.sessions
            .remove_if(&user_id, |_, session| session.menu_message_id == menu_message_id)
            .map(|(_, session)| session)
    }

    /// Put the session back in menu mode if `capture` is still its active
    /// input capture. Returns whether anything changed.
    pub fn release_input(&self, user_id: UserId, capture: Uuid) -> bool {
        let Some(mut entry) = self.sessions.get_mut(&user_id) else {
            return false;
        };
        let active = matches!(
            &entry.state,
            SessionState::InInputDialog(handle) if handle.id() == capture
        );
        if active {
            entry.state = SessionState::InMenu;
        }
        active
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session idle for longer than the timeout. Captures
    /// waiting on a removed session are told to quit.
    pub fn reap_idle(&self, now: Instant) -> usize {
        let expired: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|entry| self.is_expired(entry.value(), now))
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for user_id in expired {
            let Some((_, session)) = self
                .sessions
                .remove_if(&user_id, |_, session| self.is_expired(session, now))
            else {
                continue;
            };
            reaped += 1;
            if let Some(handle) = session.input_handle() {
                if let Err(e) = handle.cancel() {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "undeliverable cancellation for idle input capture"
                    );
                }
            }
            tracing::debug!(
                user_id = %user_id,
                created_at = %session.created_at,
                "idle session terminated"
            );
        }
        reaped
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.last_activity) > self.timeout
    }

    /// Start the background loop reaping idle sessions every `interval`.
    pub async fn spawn_reaper(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::clone(self);
        let shutdown = self.shutdown.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("session reaper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if registry.is_empty() {
                            continue;
                        }
                        let reaped = registry.reap_idle(Instant::now());
                        if reaped > 0 {
                            tracing::info!(
                                reaped,
                                remaining = registry.len(),
                                "reaped idle sessions"
                            );
                        }
                    }
                }
            }
        });
        self.background_tasks.lock().await.push(handle);
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles = {
            let mut guard = self.background_tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "session reaper join failed");
                }
                Err(_) => {
                    tracing::warn!("timed out waiting for session reaper shutdown");
                }
            }
        }
    }
}

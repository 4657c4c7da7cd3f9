use crate::state::SessionData;
use crate::util::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type SessionStore = Arc<dyn SessionStoreType>;

/// Per-user conversation state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Session {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub current_flow: String,
    pub current_step: String,
    #[serde(default)]
    pub data: SessionData,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user: impl Into<String>,
        display_name: Option<String>,
        flow: impl Into<String>,
        step: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user: user.into(),
            display_name,
            current_flow: flow.into(),
            current_step: step.into(),
            data: SessionData::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// The (flow, step) pair the session is parked on.
    pub fn position(&self) -> (&str, &str) {
        (&self.current_flow, &self.current_step)
    }

    pub fn move_to(&mut self, flow: impl Into<String>, step: impl Into<String>) {
        self.current_flow = flow.into();
        self.current_step = step.into();
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.last_activity > ttl
    }

    /// Partially written or corrupted sessions are not worth resuming.
    pub fn is_valid(&self) -> bool {
        !self.user.is_empty() && !self.current_flow.is_empty() && !self.current_step.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session backend unavailable: {0}")]
    Backend(String),
    #[error("could not encode session: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Keyed storage of sessions with lazy, per-lookup expiry.
#[async_trait]
pub trait SessionStoreType: Send + Sync + Debug {
    /// Returns the session if present and still active. Expired or invalid
    /// sessions are removed as a side effect and reported as absent.
    async fn get(&self, user: &str) -> Option<Session>;

    /// Upserts the session and stamps `last_activity` with the current time.
    async fn put(&self, user: &str, session: &mut Session) -> Result<(), SessionStoreError>;

    /// Removes the session, if any.
    async fn delete(&self, user: &str);

    /// All sessions that have not expired; expired ones found on the way are evicted.
    async fn list_active(&self) -> Vec<Session>;

    fn name(&self) -> &'static str;
}

#[derive(Clone, Debug)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>, // user → session
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    /// Creates a store whose sessions expire after `ttl` of inactivity.
    pub fn new(ttl: TimeDelta) -> Arc<Self> {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: TimeDelta, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Arc::new(DashMap::new()),
            ttl,
            clock,
        })
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Inserts the session exactly as given, without stamping.
    pub fn insert_raw(&self, session: Session) {
        self.sessions.insert(session.user.clone(), session);
    }
}

#[async_trait]
impl SessionStoreType for InMemorySessionStore {
    async fn get(&self, user: &str) -> Option<Session> {
        let now = self.clock.now();
        let ttl = self.ttl;

        // check and evict under the same shard lock
        if let Some((_, stale)) = self
            .sessions
            .remove_if(user, |_, s| s.is_expired(now, ttl) || !s.is_valid())
        {
            info!(
                "Session expired: user={}, last_activity={}",
                user, stale.last_activity
            );
            return None;
        }

        self.sessions.get(user).map(|s| s.clone())
    }

    async fn put(&self, user: &str, session: &mut Session) -> Result<(), SessionStoreError> {
        session.last_activity = self.clock.now();
        self.sessions.insert(user.to_string(), session.clone());
        debug!("Session saved for user: {}", user);
        Ok(())
    }

    async fn delete(&self, user: &str) {
        if self.sessions.remove(user).is_some() {
            info!("Session deleted for user: {}", user);
        }
    }

    async fn list_active(&self) -> Vec<Session> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut evicted = 0usize;

        self.sessions.retain(|_, s| {
            let keep = !s.is_expired(now, ttl) && s.is_valid();
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            info!("Evicted {} expired sessions", evicted);
        }

        let mut active: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        active.sort_by(|a, b| a.user.cmp(&b.user));
        active
    }

    fn name(&self) -> &'static str {
        "InMemorySessionStore"
    }
}

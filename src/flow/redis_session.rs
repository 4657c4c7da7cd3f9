//! Session store backed by Redis, for deployments that run more than one
//! instance. Enabled with the `redis-store` feature.

use crate::flow::session::{Session, SessionStoreError, SessionStoreType};
use crate::util::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct RedisSessionStore {
    client: redis::Client,
    prefix: String,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl From<redis::RedisError> for SessionStoreError {
    fn from(e: redis::RedisError) -> Self {
        SessionStoreError::Backend(e.to_string())
    }
}

/// A stored value, classified. Anything but `Active` gets deleted.
#[derive(Debug)]
enum Decoded {
    Active(Session),
    Expired,
    Invalid,
    Undecodable(serde_json::Error),
}

fn decode(raw: &str, now: DateTime<Utc>, ttl: TimeDelta) -> Decoded {
    match serde_json::from_str::<Session>(raw) {
        Ok(s) if !s.is_valid() => Decoded::Invalid,
        Ok(s) if s.is_expired(now, ttl) => Decoded::Expired,
        Ok(s) => Decoded::Active(s),
        Err(e) => Decoded::Undecodable(e),
    }
}

impl RedisSessionStore {
    pub fn new(url: &str, ttl: TimeDelta) -> Result<Arc<Self>, SessionStoreError> {
        let client = redis::Client::open(url)?;
        Ok(Arc::new(Self {
            client,
            prefix: "user_session:".to_string(),
            ttl,
            clock: Arc::new(SystemClock),
        }))
    }

    fn key(&self, user: &str) -> String {
        format!("{}{}", self.prefix, user)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, SessionStoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn load(&self, conn: &mut MultiplexedConnection, key: &str) -> Option<Session> {
        let raw: Option<String> = match conn.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("redis get {} failed: {}", key, e);
                return None;
            }
        };
        let raw = raw?;

        match decode(&raw, self.clock.now(), self.ttl) {
            Decoded::Active(session) => Some(session),
            Decoded::Expired => {
                info!("Session expired: key={}", key);
                self.evict(conn, key).await;
                None
            }
            Decoded::Invalid => {
                warn!("discarding incomplete session {}", key);
                self.evict(conn, key).await;
                None
            }
            Decoded::Undecodable(e) => {
                warn!("discarding undecodable session {}: {}", key, e);
                self.evict(conn, key).await;
                None
            }
        }
    }

    async fn evict(&self, conn: &mut MultiplexedConnection, key: &str) {
        if let Err(e) = conn.del::<_, ()>(key).await {
            error!("redis del {} failed: {}", key, e);
        }
    }
}

#[async_trait]
impl SessionStoreType for RedisSessionStore {
    async fn get(&self, user: &str) -> Option<Session> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("{}", e);
                return None;
            }
        };
        self.load(&mut conn, &self.key(user)).await
    }

    async fn put(&self, user: &str, session: &mut Session) -> Result<(), SessionStoreError> {
        session.last_activity = self.clock.now();
        let payload = serde_json::to_string(session)?;
        let seconds = self.ttl.num_seconds().max(1) as u64;

        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(self.key(user), payload, seconds).await?;
        Ok(())
    }

    async fn delete(&self, user: &str) {
        match self.connection().await {
            Ok(mut conn) => self.evict(&mut conn, &self.key(user)).await,
            Err(e) => error!("{}", e),
        }
    }

    async fn list_active(&self) -> Vec<Session> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("{}", e);
                return Vec::new();
            }
        };

        let pattern = format!("{}*", self.prefix);
        let keys: Vec<String> = {
            let mut iter = match conn.scan_match::<_, String>(&pattern).await {
                Ok(iter) => iter,
                Err(e) => {
                    error!("redis scan {} failed: {}", pattern, e);
                    return Vec::new();
                }
            };
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut active = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(session) = self.load(&mut conn, &key).await {
                active.push(session);
            }
        }
        active.sort_by(|a, b| a.user.cmp(&b.user));
        active
    }

    fn name(&self) -> &'static str {
        "RedisSessionStore"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(session: &Session) -> String {
        serde_json::to_string(session).unwrap()
    }

    #[test]
    fn decode_accepts_a_fresh_session() {
        let now = Utc::now();
        let raw = stored(&Session::new("u1", None, "main", "main_menu", now));
        match decode(&raw, now + TimeDelta::hours(1), TimeDelta::hours(24)) {
            Decoded::Active(s) => assert_eq!(s.position(), ("main", "main_menu")),
            other => panic!("expected active, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        let decoded = decode("{\"user\": 42", Utc::now(), TimeDelta::hours(24));
        assert!(matches!(decoded, Decoded::Undecodable(_)));
    }

    #[test]
    fn decode_flags_expired_sessions() {
        let now = Utc::now();
        let raw = stored(&Session::new("u1", None, "booking", "form", now - TimeDelta::hours(25)));
        assert!(matches!(decode(&raw, now, TimeDelta::hours(24)), Decoded::Expired));
    }

    #[test]
    fn decode_flags_incomplete_sessions() {
        let now = Utc::now();
        let raw = stored(&Session::new("u1", None, "", "form", now));
        assert!(matches!(decode(&raw, now, TimeDelta::hours(24)), Decoded::Invalid));
    }
}

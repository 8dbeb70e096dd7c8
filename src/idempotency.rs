use crate::models::ProcessResponse;
use redis::AsyncCommands;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<ProcessResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(
    client: &redis::Client,
    key: &str,
    value: &ProcessResponse,
    ttl_secs: usize,
) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs as u64).await;
    }
}

/// In-process fallback when Redis is not configured. Entries carry the same
/// TTL as the Redis path and are pruned on access.
pub struct MemoryStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, ProcessResponse)>>,
}

impl MemoryStore {
    pub fn from_env() -> Self {
        Self::with_ttl(Duration::from_secs(ttl_secs_from_env() as u64))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<ProcessResponse> {
        let mut guard = self.entries.lock().await;
        prune_expired(&mut guard, self.ttl);
        guard.get(key).map(|(_, response)| response.clone())
    }

    pub async fn set(&self, key: String, value: ProcessResponse) {
        let mut guard = self.entries.lock().await;
        prune_expired(&mut guard, self.ttl);
        guard.insert(key, (Instant::now(), value));
    }
}

pub fn ttl_secs_from_env() -> usize {
    std::env::var("IDEMPOTENCY_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600)
}

fn prune_expired(entries: &mut HashMap<String, (Instant, ProcessResponse)>, ttl: Duration) {
    let now = Instant::now();
    entries.retain(|_, (stored_at, _)| now.duration_since(*stored_at) < ttl);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response(session_id: &str) -> ProcessResponse {
        ProcessResponse {
            success: true,
            session_id: session_id.to_string(),
            products: vec![],
            failed: vec![],
            stages: vec![],
        }
    }

    #[tokio::test]
    async fn replays_stored_response_within_ttl() {
        let store = MemoryStore::with_ttl(Duration::from_secs(60));
        store.set("key-1".into(), sample_response("abc")).await;
        let replayed = store.get("key-1").await.expect("stored entry");
        assert_eq!(replayed.session_id, "abc");
        assert!(store.get("key-2").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_pruned() {
        let store = MemoryStore::with_ttl(Duration::from_millis(1));
        store.set("key-1".into(), sample_response("abc")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.get("key-1").await.is_none());
        let guard = store.entries.lock().await;
        assert!(guard.is_empty());
    }
}

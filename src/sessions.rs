use crate::catalog::ProductRecord;
use crate::models::ExpansionMode;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One user's working set between `/process` and `/export`. Lives only as
/// long as the TTL; there is no database behind it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub size_options: Vec<String>,
    pub expansion: ExpansionMode,
    pub products: Vec<ProductRecord>,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn from_env() -> Self {
        let ttl_secs = std::env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(3600);
        Self::with_ttl(Duration::from_secs(ttl_secs))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn create(
        &self,
        products: Vec<ProductRecord>,
        size_options: Vec<String>,
        expansion: ExpansionMode,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let session = Session {
            id,
            created_at: Utc::now(),
            size_options,
            expansion,
            products,
        };
        let mut guard = self.inner.lock().await;
        prune_expired(&mut guard, self.ttl);
        guard.insert(id, session);
        id
    }

    /// Run `f` against a live session; `None` if it is unknown or expired.
    pub async fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        let mut guard = self.inner.lock().await;
        prune_expired(&mut guard, self.ttl);
        guard.get_mut(&id).map(f)
    }
}

/// Store a finished batch as a fresh session and shape the API response.
pub async fn register_batch(
    sessions: &SessionStore,
    outcome: crate::pipeline::BatchOutcome,
    size_options: Vec<String>,
    expansion: ExpansionMode,
) -> crate::models::ProcessResponse {
    let summaries = outcome
        .products
        .iter()
        .map(crate::models::ProductSummary::from)
        .collect();
    let session_id = sessions
        .create(outcome.products, size_options, expansion)
        .await;
    crate::models::ProcessResponse {
        success: true,
        session_id: session_id.to_string(),
        products: summaries,
        failed: outcome.failed,
        stages: outcome.stages,
    }
}

fn prune_expired(sessions: &mut HashMap<Uuid, Session>, ttl: Duration) {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(3600));
    sessions.retain(|_, session| session.created_at >= cutoff);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product() -> ProductRecord {
        ProductRecord {
            sku: "TEE-001".into(),
            name: "Tee".into(),
            regular_price: 100.0,
            sale_price: 120.0,
            brand: None,
            categories: vec!["Clothing".into()],
            short_description: String::new(),
            long_description: vec![],
            image: "https://example.com/t.jpg".into(),
            sizes: vec!["S".into()],
        }
    }

    #[tokio::test]
    async fn create_and_mutate_session() {
        let store = SessionStore::with_ttl(Duration::from_secs(60));
        let id = store
            .create(
                vec![sample_product()],
                crate::catalog::default_size_options(),
                ExpansionMode::Variations,
            )
            .await;

        let sizes = store
            .with_session(id, |session| {
                let options = session.size_options.clone();
                session.products[0].toggle_all_sizes(&options);
                session.products[0].sizes.clone()
            })
            .await
            .expect("session exists");
        assert_eq!(sizes, crate::catalog::default_size_options());
    }

    #[tokio::test]
    async fn unknown_session_returns_none() {
        let store = SessionStore::with_ttl(Duration::from_secs(60));
        assert!(store.with_session(Uuid::new_v4(), |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_pruned() {
        let store = SessionStore::with_ttl(Duration::from_secs(0));
        let id = store
            .create(vec![], crate::catalog::default_size_options(), ExpansionMode::Variations)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.with_session(id, |_| ()).await.is_none());
    }
}

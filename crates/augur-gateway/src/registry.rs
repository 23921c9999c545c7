//! Per-user reasoning sessions
//!
//! Sessions are keyed by user ID, outlive connections, and are reused on
//! reconnect. Creation goes through a per-key `OnceCell` so two concurrent
//! auths for the same user share one in-flight open.

use augur_core::{ProviderError, ReasoningSession, ReasoningSessionProvider};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

type SessionCell = Arc<OnceCell<Arc<dyn ReasoningSession>>>;

#[derive(Clone)]
pub struct ReasoningSessionRegistry {
    provider: Arc<dyn ReasoningSessionProvider>,
    sessions: Arc<DashMap<String, SessionCell>>,
}

impl std::fmt::Debug for ReasoningSessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningSessionRegistry")
            .field("provider", &"<provider>")
            .field("sessions", &self.len())
            .finish()
    }
}

impl ReasoningSessionRegistry {
    pub fn new(provider: Arc<dyn ReasoningSessionProvider>) -> Self {
        Self {
            provider,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Get the user's session, opening it on first use.
    ///
    /// A failed open leaves the slot empty so the next call retries.
    pub async fn get_or_create(
        &self,
        user_id: &str,
    ) -> Result<Arc<dyn ReasoningSession>, ProviderError> {
        // Clone the cell out so the map shard lock is released before awaiting
        let cell = Arc::clone(
            self.sessions
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );

        let session = cell
            .get_or_try_init(|| async {
                debug!(user_id = %user_id, "Opening reasoning session");
                let session = self.provider.open_session(user_id).await?;
                info!(user_id = %user_id, "Reasoning session opened");
                Ok::<_, ProviderError>(session)
            })
            .await?;

        Ok(Arc::clone(session))
    }

    /// The user's session if one was already opened
    pub fn get(&self, user_id: &str) -> Option<Arc<dyn ReasoningSession>> {
        self.sessions
            .get(user_id)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Number of opened sessions
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use augur_core::ToolDescriptor;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubSession {
        user_id: String,
    }

    #[async_trait]
    impl ReasoningSession for StubSession {
        fn user_id(&self) -> &str {
            &self.user_id
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn initialize(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn tools(&self) -> Vec<ToolDescriptor> {
            Vec::new()
        }

        async fn call_tool(&self, name: &str, _arguments: Value) -> Result<Value, ProviderError> {
            Err(ProviderError::ToolNotFound(name.to_string()))
        }
    }

    #[derive(Default)]
    struct SlowProvider {
        opened: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl ReasoningSessionProvider for SlowProvider {
        async fn open_session(
            &self,
            user_id: &str,
        ) -> Result<Arc<dyn ReasoningSession>, ProviderError> {
            let attempt = self.opened.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && attempt == 0 {
                return Err(ProviderError::Unavailable("cold start".to_string()));
            }
            Ok(Arc::new(StubSession {
                user_id: user_id.to_string(),
            }))
        }
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_opens_once() {
        let provider = Arc::new(SlowProvider::default());
        let registry = ReasoningSessionRegistry::new(provider.clone());

        let (a, b) = tokio::join!(registry.get_or_create("u1"), registry.get_or_create("u1"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_per_user() {
        let registry = ReasoningSessionRegistry::new(Arc::new(SlowProvider::default()));
        let a = registry.get_or_create("u1").await.unwrap();
        let b = registry.get_or_create("u2").await.unwrap();
        assert_eq!(a.user_id(), "u1");
        assert_eq!(b.user_id(), "u2");
        assert_eq!(registry.len(), 2);
        assert!(registry.get("u3").is_none());
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let provider = Arc::new(SlowProvider {
            fail_first: true,
            ..Default::default()
        });
        let registry = ReasoningSessionRegistry::new(provider.clone());

        assert!(registry.get_or_create("u1").await.is_err());
        assert!(registry.is_empty());
        assert!(registry.get_or_create("u1").await.is_ok());
        assert_eq!(provider.opened.load(Ordering::SeqCst), 2);
    }
}

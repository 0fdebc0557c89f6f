/// Session registry: maps session ids to live sessions and owns their lifecycle
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::{Session, SessionId, SessionInfo};
use crate::auth::Principal;
use crate::config::SessionConfig;
use crate::service::{PtyManager, ServiceError};

/// Limits and timers applied by the registry
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub grace_period: Duration,
    pub limit_global: usize,
    pub limit_per_user: usize,
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            limit_global: config.limit_global,
            limit_per_user: config.limit_per_user,
        }
    }
}

/// A session together with the token that ends this particular attachment
pub type Attached = (Arc<Session>, CancellationToken);

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    pty_manager: PtyManager,
    policy: SessionPolicy,
}

impl SessionRegistry {
    pub fn new(pty_manager: PtyManager, policy: SessionPolicy) -> Self {
        info!(
            "Session registry ready (grace period {:?}, limit {} global / {} per user)",
            policy.grace_period, policy.limit_global, policy.limit_per_user
        );
        Self {
            sessions: Mutex::new(HashMap::new()),
            pty_manager,
            policy,
        }
    }

    pub fn pty_manager(&self) -> &PtyManager {
        &self.pty_manager
    }

    /// Spawn a shell and register a new session in the `Created` state
    pub async fn create(
        &self,
        owner: Option<&str>,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<Session>, ServiceError> {
        self.check_limits(owner).await?;

        let handle = self.pty_manager.spawn(cols, rows).await?;
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            id.clone(),
            owner.map(str::to_string),
            handle,
            cols,
            rows,
        ));

        let mut sessions = self.sessions.lock().await;
        // Limits are re-checked under the lock; the spawn above ran without it
        if let Err(e) = Self::within_limits(&sessions, &self.policy, owner) {
            drop(sessions);
            session.mark_destroyed();
            self.pty_manager.terminate(session.pty()).await;
            return Err(e);
        }
        sessions.insert(id.clone(), Arc::clone(&session));
        info!(
            "Created session {} for {:?} ({} active)",
            id,
            owner,
            sessions.len()
        );
        Ok(session)
    }

    /// Bind a connection to a session, replacing any connection already attached
    pub async fn attach(
        &self,
        id: &str,
        connection_id: &str,
        principal: &Principal,
    ) -> Result<Attached, ServiceError> {
        // Held across the state change so a concurrent sweep sees the attachment
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(id)
            .filter(|s| principal.can_access(s.owner()))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        let cancel = session
            .attach(connection_id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        drop(sessions);

        info!("Connection {} attached to session {}", connection_id, id);
        Ok((session, cancel))
    }

    /// Start the grace period, unless another connection has taken over
    pub async fn detach(&self, id: &str, connection_id: &str) -> bool {
        let Some(session) = self.get(id).await else {
            return false;
        };
        let detached = session.detach(connection_id);
        if detached {
            info!(
                "Connection {} detached from session {}; grace period {:?} started",
                connection_id, id, self.policy.grace_period
            );
        }
        detached
    }

    /// Terminate the shell and forget the session. Idempotent.
    pub async fn destroy(&self, id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(id)
                .map(|session| (session.mark_destroyed(), session))
        };
        let Some((first, session)) = removed else {
            debug!("Session {} already gone", id);
            return false;
        };

        if first {
            self.pty_manager.terminate(session.pty()).await;
            info!("Destroyed session {}", id);
        }
        true
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Look up a session the principal may use; foreign sessions are reported as missing
    pub async fn get_for(&self, id: &str, principal: &Principal) -> Result<Arc<Session>, ServiceError> {
        self.get(id)
            .await
            .filter(|s| principal.can_access(s.owner()))
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        let mut infos: Vec<_> = sessions.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    pub async fn list_for(&self, principal: &Principal) -> Vec<SessionInfo> {
        self.list()
            .await
            .into_iter()
            .filter(|info| principal.can_access(info.owner.as_deref()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn sweep(&self) -> Vec<SessionId> {
        self.sweep_at(Instant::now()).await
    }

    /// Destroy every session that has been unattached past the grace period,
    /// or whose shell has died while nobody was attached
    pub async fn sweep_at(&self, now: Instant) -> Vec<SessionId> {
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<SessionId> = sessions
                .values()
                .filter(|s| s.is_expired(now, self.policy.grace_period))
                .map(|s| s.id().to_string())
                .collect();
            ids.iter()
                .filter_map(|id| sessions.remove(id))
                .filter(|s| s.mark_destroyed())
                .collect()
        };

        let mut swept = Vec::with_capacity(expired.len());
        for session in expired {
            info!("Session {} expired", session.id());
            self.pty_manager.terminate(session.pty()).await;
            swept.push(session.id().to_string());
        }
        swept
    }

    /// Run `sweep` every `interval` until `shutdown` fires
    pub fn start_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = registry.sweep().await;
                        if !expired.is_empty() {
                            info!("Sweep removed {} session(s)", expired.len());
                        }
                    }
                }
            }
            debug!("Session sweeper stopped");
        })
    }

    /// Destroy every session; returns how many there were
    pub async fn shutdown_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.lock().await.keys().cloned().collect();
        for id in &ids {
            self.destroy(id).await;
        }
        if !ids.is_empty() {
            info!("Cleaned up {} session(s)", ids.len());
        }
        ids.len()
    }

    async fn check_limits(&self, owner: Option<&str>) -> Result<(), ServiceError> {
        let sessions = self.sessions.lock().await;
        Self::within_limits(&sessions, &self.policy, owner)
    }

    fn within_limits(
        sessions: &HashMap<SessionId, Arc<Session>>,
        policy: &SessionPolicy,
        owner: Option<&str>,
    ) -> Result<(), ServiceError> {
        if sessions.len() >= policy.limit_global {
            warn!("Global session limit {} reached", policy.limit_global);
            return Err(ServiceError::SessionLimit(format!(
                "server allows at most {} sessions",
                policy.limit_global
            )));
        }

        if let Some(owner) = owner {
            let owned = sessions.values().filter(|s| s.owner() == Some(owner)).count();
            if owned >= policy.limit_per_user {
                warn!("User {} reached the session limit {}", owner, policy.limit_per_user);
                return Err(ServiceError::SessionLimit(format!(
                    "user {} may own at most {} sessions",
                    owner, policy.limit_per_user
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::SessionStatus;
    use crate::config::ShellConfig;
    use crate::pty::{AsyncPty, MemoryPtyFactory};

    const GRACE: Duration = Duration::from_secs(60);

    fn registry_with(factory: &MemoryPtyFactory, limit_global: usize, limit_per_user: usize) -> SessionRegistry {
        let manager = PtyManager::new(Arc::new(factory.clone()), ShellConfig::default(), 16);
        SessionRegistry::new(
            manager,
            SessionPolicy {
                grace_period: GRACE,
                limit_global,
                limit_per_user,
            },
        )
    }

    fn registry(factory: &MemoryPtyFactory) -> SessionRegistry {
        registry_with(factory, 100, 100)
    }

    #[tokio::test]
    async fn test_create_attach_detach() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);

        let session = registry.create(None, 80, 24).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Created);
        assert_eq!(registry.count().await, 1);

        let (attached, _cancel) = registry
            .attach(session.id(), "conn-1", &Principal::Anonymous)
            .await
            .unwrap();
        assert_eq!(attached.status(), SessionStatus::Attached);

        assert!(registry.detach(session.id(), "conn-1").await);
        assert_eq!(session.status(), SessionStatus::Detached);
        assert!(!registry.detach(session.id(), "conn-1").await);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let a = registry.create(None, 80, 24).await.unwrap();
        let b = registry.create(None, 80, 24).await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_reattach_replaces_previous_connection() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let session = registry.create(None, 80, 24).await.unwrap();

        let (_, first) = registry.attach(session.id(), "a", &Principal::Anonymous).await.unwrap();
        let (_, second) = registry.attach(session.id(), "b", &Principal::Anonymous).await.unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // The replaced connection going away must not detach the new one
        assert!(!registry.detach(session.id(), "a").await);
        assert_eq!(session.status(), SessionStatus::Attached);
    }

    #[tokio::test]
    async fn test_attach_unknown_session() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let result = registry.attach("missing", "conn", &Principal::Anonymous).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_foreign_session_is_not_found() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let session = registry.create(Some("alice"), 80, 24).await.unwrap();

        let bob = Principal::User("bob".to_string());
        assert!(matches!(
            registry.attach(session.id(), "conn", &bob).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(registry.get_for(session.id(), &bob).await.is_err());
        assert!(registry.list_for(&bob).await.is_empty());

        let alice = Principal::User("alice".to_string());
        assert_eq!(registry.list_for(&alice).await.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let session = registry.create(None, 80, 24).await.unwrap();
        let id = session.id().to_string();

        assert!(registry.destroy(&id).await);
        assert!(!registry.destroy(&id).await);
        assert_eq!(session.status(), SessionStatus::Destroyed);
        assert!(session.closed().is_cancelled());
        assert!(!factory.spawned()[0].is_alive());
        assert!(matches!(
            registry.attach(&id, "conn", &Principal::Anonymous).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        let factory = MemoryPtyFactory::new();
        factory.set_fail_spawn(true);
        let registry = registry(&factory);

        assert!(matches!(
            registry.create(None, 80, 24).await,
            Err(ServiceError::SpawnFailed(_))
        ));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_session_limits() {
        let factory = MemoryPtyFactory::new();
        let registry = registry_with(&factory, 3, 2);

        registry.create(Some("alice"), 80, 24).await.unwrap();
        registry.create(Some("alice"), 80, 24).await.unwrap();
        assert!(matches!(
            registry.create(Some("alice"), 80, 24).await,
            Err(ServiceError::SessionLimit(_))
        ));

        registry.create(Some("bob"), 80, 24).await.unwrap();
        assert!(matches!(
            registry.create(Some("carol"), 80, 24).await,
            Err(ServiceError::SessionLimit(_))
        ));
        assert_eq!(registry.count().await, 3);
    }

    #[tokio::test]
    async fn test_sweep_respects_grace_period() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let session = registry.create(None, 80, 24).await.unwrap();
        let id = session.id().to_string();
        registry.attach(&id, "conn", &Principal::Anonymous).await.unwrap();

        // Attached sessions never expire
        assert!(registry.sweep_at(Instant::now() + GRACE * 10).await.is_empty());

        registry.detach(&id, "conn").await;
        let detached_at = Instant::now();
        assert!(registry.sweep_at(detached_at + GRACE / 2).await.is_empty());
        assert_eq!(registry.count().await, 1);

        let swept = registry.sweep_at(detached_at + GRACE + Duration::from_secs(1)).await;
        assert_eq!(swept, vec![id.clone()]);
        assert_eq!(registry.count().await, 0);
        assert!(!factory.spawned()[0].is_alive());
        assert!(matches!(
            registry.attach(&id, "late", &Principal::Anonymous).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unattached_session_expires_from_creation() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        registry.create(None, 80, 24).await.unwrap();

        let swept = registry.sweep_at(Instant::now() + GRACE + Duration::from_secs(1)).await;
        assert_eq!(swept.len(), 1);
    }

    #[tokio::test]
    async fn test_dead_detached_shell_is_swept_immediately() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let session = registry.create(None, 80, 24).await.unwrap();
        let id = session.id().to_string();
        registry.attach(&id, "conn", &Principal::Anonymous).await.unwrap();
        registry.detach(&id, "conn").await;

        factory.spawned()[0].exit(0);
        assert_eq!(registry.sweep_at(Instant::now()).await, vec![id]);
    }

    #[tokio::test]
    async fn test_reattach_within_grace_cancels_expiry() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        let session = registry.create(None, 80, 24).await.unwrap();
        let id = session.id().to_string();

        registry.attach(&id, "first", &Principal::Anonymous).await.unwrap();
        registry.detach(&id, "first").await;
        registry.attach(&id, "second", &Principal::Anonymous).await.unwrap();

        assert!(registry.sweep_at(Instant::now() + GRACE * 2).await.is_empty());
        assert_eq!(session.status(), SessionStatus::Attached);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_never_destroys_a_session_it_lost_to_attach() {
        let factory = MemoryPtyFactory::new();
        let registry = Arc::new(registry(&factory));
        let mut sessions = Vec::new();
        for _ in 0..32 {
            sessions.push(registry.create(None, 80, 24).await.unwrap());
        }
        let later = Instant::now() + GRACE * 2;

        let attaches: Vec<_> = sessions
            .iter()
            .map(|session| {
                let registry = Arc::clone(&registry);
                let id = session.id().to_string();
                tokio::spawn(async move {
                    registry.attach(&id, "conn", &Principal::Anonymous).await.is_ok()
                })
            })
            .collect();
        let swept = registry.sweep_at(later).await;

        for (session, attach) in sessions.iter().zip(attaches) {
            let attached = attach.await.unwrap();
            let was_swept = swept.iter().any(|id| id == session.id());
            assert_ne!(attached, was_swept, "session {} both attached and swept", session.id());
            if attached {
                assert_eq!(session.status(), SessionStatus::Attached);
                assert!(registry.get(session.id()).await.is_some());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let factory = MemoryPtyFactory::new();
        let registry = Arc::new(registry(&factory));
        registry.create(None, 80, 24).await.unwrap();

        let shutdown = CancellationToken::new();
        let sweeper = registry.start_sweeper(Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(GRACE + Duration::from_secs(10)).await;
        assert_eq!(registry.count().await, 0);

        shutdown.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let factory = MemoryPtyFactory::new();
        let registry = registry(&factory);
        registry.create(None, 80, 24).await.unwrap();
        registry.create(None, 80, 24).await.unwrap();

        assert_eq!(registry.shutdown_all().await, 2);
        assert_eq!(registry.count().await, 0);
        assert!(factory.spawned().iter().all(|p| !p.is_alive()));
    }
}

//! Impersonation session registry.
//!
//! Impersonation tokens verify on their own like any other JWT, but an
//! administrator must be able to kill one immediately. Every minted token gets
//! a record here keyed by its `jti`; the auth middleware asks
//! [`SessionRegistry::is_revoked`] before trusting such a token.
//!
//! Records are dual-written to a durable [`SessionStore`] (authority of
//! record) and an in-process fallback map. Reads prefer the durable store and
//! only fall back when it errors. A crash between token issuance and a failed
//! durable write leaves a token that no other process can revoke; that window
//! is accepted and logged, not hidden.
//!
//! Revocation only ever moves one way. A revocation that reached only the
//! fallback is OR-ed into every durable answer and replayed to the store on
//! the next successful call, so recovering the store never revives a token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use tracing::{info, warn};

use super::AuthError;
use crate::models::auth::{ImpersonationSession, SessionFilter};

/// Maximum number of rows returned by a listing.
pub const LIST_LIMIT: i64 = 100;

/// Durable storage for impersonation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &ImpersonationSession) -> Result<(), AuthError>;

    async fn find(&self, jti: &str) -> Result<Option<ImpersonationSession>, AuthError>;

    /// Set `revoked` on one record. Returns whether a record matched.
    async fn revoke(&self, jti: &str) -> Result<bool, AuthError>;

    /// Set `revoked` on every record matching `filter`. Returns rows touched.
    async fn revoke_matching(&self, filter: &SessionFilter) -> Result<u64, AuthError>;

    /// Matching records, newest first, at most `limit`.
    async fn list(
        &self,
        filter: &SessionFilter,
        limit: i64,
    ) -> Result<Vec<ImpersonationSession>, AuthError>;
}

/// Stateful authority for impersonation sessions.
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    fallback: DashMap<String, ImpersonationSession>,
    /// Revocations the durable store has not acknowledged yet.
    pending: DashSet<String>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            fallback: DashMap::new(),
            pending: DashSet::new(),
        }
    }

    /// Whether the fallback holds an explicit revocation for `jti`.
    fn revoked_locally(&self, jti: &str) -> bool {
        self.fallback.get(jti).is_some_and(|s| s.revoked)
    }

    /// Push fallback-only revocations to the durable store.
    async fn replay_pending(&self) {
        let jtis: Vec<String> = self.pending.iter().map(|j| j.clone()).collect();
        for jti in jtis {
            match self.store.revoke(&jti).await {
                Ok(_) => {
                    self.pending.remove(&jti);
                    info!(jti = %jti, "pending revocation replayed to durable store");
                }
                Err(e) => {
                    warn!(jti = %jti, error = %e, "pending revocation replay failed");
                    return;
                }
            }
        }
    }

    /// Record a freshly minted impersonation token.
    ///
    /// Never fails because of the durable store: the token is already usable,
    /// so a failed write degrades to fallback-only tracking.
    pub async fn register(
        &self,
        admin_id: &str,
        target_user_id: &str,
        target_role: &str,
        jti: &str,
        ttl_secs: i64,
    ) -> ImpersonationSession {
        let now = Utc::now();
        let session = ImpersonationSession {
            jti: jti.to_string(),
            admin_id: admin_id.to_string(),
            target_user_id: target_user_id.to_string(),
            target_role: target_role.to_string(),
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            revoked: false,
        };

        self.fallback.retain(|_, s| s.expires_at > now);
        self.fallback.insert(session.jti.clone(), session.clone());

        if let Err(e) = self.store.insert(&session).await {
            warn!(
                jti,
                admin = admin_id,
                error = %e,
                "durable session write failed; session tracked in-process only and is not revocable from other processes"
            );
        }
        session
    }

    /// Revoke one session. Idempotent; unknown `jti` yields `false`.
    pub async fn revoke(&self, jti: &str) -> bool {
        let known_locally = match self.fallback.get_mut(jti) {
            Some(mut s) => {
                s.revoked = true;
                true
            }
            None => false,
        };

        match self.store.revoke(jti).await {
            Ok(found) => {
                self.replay_pending().await;
                found || known_locally
            }
            Err(e) => {
                warn!(jti, error = %e, "durable revoke failed; revoked in-process only");
                if known_locally {
                    self.pending.insert(jti.to_string());
                }
                known_locally
            }
        }
    }

    /// Revoke every session matching `filter`. An empty filter is refused.
    pub async fn revoke_all(&self, filter: &SessionFilter) -> Result<u64, AuthError> {
        if filter.is_empty() {
            return Err(AuthError::ValidationFailed(
                "revoke-all requires an adminId or userId filter".into(),
            ));
        }

        let mut touched = Vec::new();
        for mut s in self.fallback.iter_mut() {
            if s.matches(filter) && !s.revoked {
                s.revoked = true;
                touched.push(s.jti.clone());
            }
        }
        let local = touched.len() as u64;

        match self.store.revoke_matching(filter).await {
            Ok(n) => {
                info!(?filter, revoked = n, "impersonation sessions revoked");
                self.replay_pending().await;
                Ok(n.max(local))
            }
            Err(e) => {
                warn!(?filter, error = %e, "durable bulk revoke failed; revoked in-process only");
                for jti in touched {
                    self.pending.insert(jti);
                }
                Ok(local)
            }
        }
    }

    /// Matching sessions, newest first, with expiry presented as revocation.
    pub async fn list(&self, filter: &SessionFilter) -> Vec<ImpersonationSession> {
        self.list_at(filter, Utc::now()).await
    }

    async fn list_at(&self, filter: &SessionFilter, now: DateTime<Utc>) -> Vec<ImpersonationSession> {
        let mut sessions = match self.store.list(filter, LIST_LIMIT).await {
            Ok(mut rows) => {
                self.replay_pending().await;
                for row in rows.iter_mut() {
                    row.revoked = row.revoked || self.revoked_locally(&row.jti);
                }
                // Records whose durable write failed are only known here.
                for s in self.fallback.iter() {
                    if s.matches(filter) && !rows.iter().any(|r| r.jti == s.jti) {
                        rows.push(s.clone());
                    }
                }
                rows
            }
            Err(e) => {
                warn!(error = %e, "durable session listing failed; serving in-process records");
                self.fallback
                    .iter()
                    .filter(|s| s.matches(filter))
                    .map(|s| s.clone())
                    .collect()
            }
        };

        sessions.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        sessions.truncate(LIST_LIMIT as usize);
        sessions
            .into_iter()
            .map(|s| s.with_effective_revocation(now))
            .collect()
    }

    /// Whether the token with this `jti` must be refused.
    ///
    /// Unknown ids are not revoked: ordinary tokens never appear here.
    pub async fn is_revoked(&self, jti: &str) -> bool {
        self.is_revoked_at(jti, Utc::now()).await
    }

    pub async fn is_revoked_at(&self, jti: &str, now: DateTime<Utc>) -> bool {
        let local = self.fallback.get(jti).map(|s| s.is_dead_at(now));
        match self.store.find(jti).await {
            Ok(Some(s)) => {
                if !s.revoked && self.revoked_locally(jti) {
                    self.replay_pending().await;
                    return true;
                }
                s.is_dead_at(now)
            }
            Ok(None) => local.unwrap_or(false),
            Err(e) => {
                warn!(jti, error = %e, "durable session lookup failed; using in-process record");
                local.unwrap_or(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySessionStore;

    fn registry() -> (Arc<MemorySessionStore>, SessionRegistry) {
        let store = Arc::new(MemorySessionStore::new());
        let registry = SessionRegistry::new(store.clone());
        (store, registry)
    }

    #[tokio::test]
    async fn fresh_session_is_live_then_revoked() {
        let (_, reg) = registry();
        let s = reg.register("admin-1", "user-1", "student", "j1", 1800).await;
        assert!(!s.revoked);
        assert!(!reg.is_revoked("j1").await);

        assert!(reg.revoke("j1").await);
        assert!(reg.is_revoked("j1").await);
        // Idempotent.
        assert!(reg.revoke("j1").await);
        assert!(reg.is_revoked("j1").await);
    }

    #[tokio::test]
    async fn unknown_jti_is_not_revoked() {
        let (_, reg) = registry();
        assert!(!reg.is_revoked("never-issued").await);
        assert!(!reg.revoke("never-issued").await);
    }

    #[tokio::test]
    async fn expiry_counts_as_revocation() {
        let (_, reg) = registry();
        let s = reg.register("admin-1", "user-1", "student", "j1", 60).await;
        assert!(!reg.is_revoked_at("j1", s.issued_at).await);
        assert!(reg.is_revoked_at("j1", s.expires_at).await);

        let listed = reg.list_at(&SessionFilter::by_user("user-1"), s.expires_at).await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].revoked);
    }

    #[tokio::test]
    async fn revoke_all_by_user_spans_admins() {
        let (_, reg) = registry();
        reg.register("admin-1", "user-u", "student", "j1", 1800).await;
        reg.register("admin-2", "user-u", "student", "j2", 1800).await;
        reg.register("admin-1", "user-v", "student", "j3", 1800).await;

        let n = reg.revoke_all(&SessionFilter::by_user("user-u")).await.unwrap();
        assert_eq!(n, 2);
        assert!(reg.is_revoked("j1").await);
        assert!(reg.is_revoked("j2").await);
        assert!(!reg.is_revoked("j3").await);

        let listed = reg.list(&SessionFilter::by_user("user-u")).await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.revoked));

        // Second call changes nothing observable.
        reg.revoke_all(&SessionFilter::by_user("user-u")).await.unwrap();
        assert!(!reg.is_revoked("j3").await);
    }

    #[tokio::test]
    async fn revoke_all_by_admin() {
        let (_, reg) = registry();
        reg.register("admin-1", "user-u", "student", "j1", 1800).await;
        reg.register("admin-2", "user-u", "student", "j2", 1800).await;

        reg.revoke_all(&SessionFilter::by_admin("admin-1")).await.unwrap();
        assert!(reg.is_revoked("j1").await);
        assert!(!reg.is_revoked("j2").await);
    }

    #[tokio::test]
    async fn revoke_all_requires_a_filter() {
        let (_, reg) = registry();
        reg.register("admin-1", "user-u", "student", "j1", 1800).await;
        assert!(matches!(
            reg.revoke_all(&SessionFilter::default()).await,
            Err(AuthError::ValidationFailed(_))
        ));
        assert!(!reg.is_revoked("j1").await);
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let (_, reg) = registry();
        reg.register("admin-1", "user-u", "student", "j1", 1800).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.register("admin-2", "user-u", "student", "j2", 1800).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reg.register("admin-1", "user-v", "teacher", "j3", 1800).await;

        let all_admin1 = reg.list(&SessionFilter::by_admin("admin-1")).await;
        let jtis: Vec<_> = all_admin1.iter().map(|s| s.jti.as_str()).collect();
        assert_eq!(jtis, vec!["j3", "j1"]);

        let for_u = reg.list(&SessionFilter::by_user("user-u")).await;
        let jtis: Vec<_> = for_u.iter().map(|s| s.jti.as_str()).collect();
        assert_eq!(jtis, vec!["j2", "j1"]);

        let both = reg
            .list(&SessionFilter {
                admin_id: Some("admin-1".into()),
                user_id: Some("user-u".into()),
            })
            .await;
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].jti, "j1");
    }

    #[tokio::test]
    async fn register_survives_durable_outage() {
        let (store, reg) = registry();
        store.set_unavailable(true);

        let s = reg.register("admin-1", "user-1", "student", "j1", 1800).await;
        assert_eq!(s.jti, "j1");
        assert!(!reg.is_revoked("j1").await);
        assert!(reg.revoke("j1").await);
        assert!(reg.is_revoked("j1").await);

        // Durable access restored: the record never reached it, so the
        // in-process revocation still stands.
        store.set_unavailable(false);
        assert!(store.find("j1").await.unwrap().is_none());
        assert!(reg.is_revoked("j1").await);
        let listed = reg.list(&SessionFilter::by_user("user-1")).await;
        assert_eq!(listed.len(), 1);
        assert!(listed[0].revoked);
    }

    #[tokio::test]
    async fn durable_store_wins_once_reachable() {
        let (store, reg) = registry();
        reg.register("admin-1", "user-1", "student", "j1", 1800).await;

        // Revocation made durable by another process.
        store.revoke("j1").await.unwrap();
        assert!(reg.is_revoked("j1").await);

        // Stale fallback says live, durable says revoked: durable wins.
        let local = reg.fallback.get("j1").map(|s| s.revoked);
        assert_eq!(local, Some(false));
        let listed = reg.list(&SessionFilter::by_admin("admin-1")).await;
        assert!(listed[0].revoked);
    }

    #[tokio::test]
    async fn revocation_during_outage_survives_recovery() {
        let (store, reg) = registry();
        reg.register("admin-1", "user-1", "student", "j1", 1800).await;

        store.set_unavailable(true);
        assert!(reg.revoke("j1").await);
        assert!(reg.is_revoked("j1").await);

        // The durable row still says live; the revocation must not be undone.
        store.set_unavailable(false);
        assert!(!store.find("j1").await.unwrap().unwrap().revoked);
        assert!(reg.is_revoked("j1").await);
        assert!(reg.is_revoked("j1").await);

        // Replayed on that successful lookup.
        assert!(store.find("j1").await.unwrap().unwrap().revoked);
        assert!(reg.pending.is_empty());
        let listed = reg.list(&SessionFilter::by_user("user-1")).await;
        assert!(listed[0].revoked);
    }

    #[tokio::test]
    async fn bulk_revocation_during_outage_is_replayed() {
        let (store, reg) = registry();
        reg.register("admin-1", "user-u", "student", "j1", 1800).await;
        reg.register("admin-2", "user-u", "student", "j2", 1800).await;

        store.set_unavailable(true);
        assert_eq!(reg.revoke_all(&SessionFilter::by_user("user-u")).await.unwrap(), 2);
        store.set_unavailable(false);

        let listed = reg.list(&SessionFilter::by_user("user-u")).await;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.revoked));
        assert!(store.find("j1").await.unwrap().unwrap().revoked);
        assert!(store.find("j2").await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn outage_during_revoke_all_uses_fallback() {
        let (store, reg) = registry();
        reg.register("admin-1", "user-u", "student", "j1", 1800).await;
        store.set_unavailable(true);
        let n = reg.revoke_all(&SessionFilter::by_user("user-u")).await.unwrap();
        assert_eq!(n, 1);
        assert!(reg.is_revoked("j1").await);
    }
}

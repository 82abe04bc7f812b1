// ABOUTME: Quota admission and accounting for chat turns
// ABOUTME: Checks message, token and file windows before any side effect and charges them after commit
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::QuotaConfig;
use crate::database::QuotaStore;
use crate::errors::{AppResult, ChatError};
use crate::logging::ChatLogger;
use crate::models::{Identity, InboundTurn, QuotaResource, QuotaSnapshot, QuotaUsage, UserRole};

/// Outcome of checking one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    /// Resource checked
    pub resource: QuotaResource,
    /// Whether the request fits the window
    pub allowed: bool,
    /// Usage in the current window; zero once the stored window ended
    pub counter: u64,
    /// Configured limit for the caller's role
    pub limit: u64,
    /// End of the current window, or of the window a first use would open
    pub period_end: DateTime<Utc>,
}

/// Amounts charged after a turn completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaCharge {
    /// Messages, normally one per turn
    pub messages: u64,
    /// Tokens billed for the reply
    pub tokens: u64,
    /// File parts submitted with the turn
    pub files: u64,
}

/// Rolling-window admission control
pub struct AdmissionController<'a> {
    quota: &'a dyn QuotaStore,
    config: &'a QuotaConfig,
}

impl<'a> AdmissionController<'a> {
    /// Controller over `quota` with the configured windows and limits
    #[must_use]
    pub const fn new(quota: &'a dyn QuotaStore, config: &'a QuotaConfig) -> Self {
        Self { quota, config }
    }

    /// Check whether `requested` more units of `resource` fit the caller's window
    ///
    /// Reads only; an expired window counts as zero without rewriting the row.
    /// Tokens are admitted while the window still has budget left, since the
    /// reply size is unknown up front.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be read
    pub async fn check_quota(
        &self,
        user_id: &str,
        role: UserRole,
        resource: QuotaResource,
        requested: u64,
        now: DateTime<Utc>,
    ) -> AppResult<QuotaDecision> {
        let limit = self.config.limits_for(role).limit_for(resource);
        let stored = self.quota.get_counter(user_id, resource).await?;

        let (counter, period_end) = match &stored {
            Some(c) if !c.is_expired(now) => (c.counter, c.period_end),
            _ => (0, now + self.config.window),
        };

        let allowed = match resource {
            QuotaResource::Tokens => counter < limit,
            QuotaResource::Messages | QuotaResource::Files => {
                counter.saturating_add(requested) <= limit
            }
        };

        Ok(QuotaDecision {
            resource,
            allowed,
            counter,
            limit,
            period_end,
        })
    }

    /// Run the checks in order messages, tokens, files and stop at the first denial
    ///
    /// File quota is only consulted when the turn carries file parts.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::AdmissionDenied`] naming the exhausted resource, or
    /// a store error if a counter cannot be read
    pub async fn admit(
        &self,
        identity: &Identity,
        inbound: &InboundTurn,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let file_count = inbound.file_count();
        let checks = [
            (QuotaResource::Messages, 1),
            (QuotaResource::Tokens, 0),
            (QuotaResource::Files, file_count),
        ];

        for (resource, requested) in checks {
            if resource == QuotaResource::Files && requested == 0 {
                continue;
            }
            let decision = self
                .check_quota(&identity.user_id, identity.role, resource, requested, now)
                .await?;
            if !decision.allowed {
                ChatLogger::log_admission_denied(&identity.user_id, resource, decision.period_end);
                return Err(ChatError::AdmissionDenied {
                    reason: resource,
                    period_end: decision.period_end,
                });
            }
        }

        Ok(())
    }

    /// Record consumption; failures are logged and do not undo the turn
    pub async fn charge(&self, user_id: &str, charge: QuotaCharge, now: DateTime<Utc>) {
        let amounts = [
            (QuotaResource::Messages, charge.messages),
            (QuotaResource::Tokens, charge.tokens),
            (QuotaResource::Files, charge.files),
        ];
        for (resource, amount) in amounts {
            if amount == 0 {
                continue;
            }
            match self
                .quota
                .increment(user_id, resource, amount, now, self.config.window)
                .await
            {
                Ok(counter) => debug!(
                    user.id = %user_id,
                    quota.resource = %resource,
                    quota.counter = counter.counter,
                    "Quota charged"
                ),
                Err(e) => warn!(
                    user.id = %user_id,
                    quota.resource = %resource,
                    error = %e,
                    "Failed to charge quota"
                ),
            }
        }
    }

    /// Current usage of every resource for the caller
    ///
    /// # Errors
    ///
    /// Returns an error if a counter cannot be read
    pub async fn snapshot(&self, identity: &Identity, now: DateTime<Utc>) -> AppResult<QuotaSnapshot> {
        Ok(QuotaSnapshot {
            messages: self.usage(identity, QuotaResource::Messages, now).await?,
            tokens: self.usage(identity, QuotaResource::Tokens, now).await?,
            files: self.usage(identity, QuotaResource::Files, now).await?,
        })
    }

    async fn usage(
        &self,
        identity: &Identity,
        resource: QuotaResource,
        now: DateTime<Utc>,
    ) -> AppResult<QuotaUsage> {
        let counter = self.quota.get_counter(&identity.user_id, resource).await?;
        let limit = self.config.limits_for(identity.role).limit_for(resource);
        Ok(QuotaUsage::from_counter(counter.as_ref(), limit, now))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::database::SqliteDatabase;
    use crate::models::time::now;
    use crate::models::{QuotaLimits, TurnPart};

    fn config() -> QuotaConfig {
        QuotaConfig {
            window: Duration::hours(24),
            guest: QuotaLimits { messages: 2, tokens: 100, files: 1 },
            regular: QuotaLimits { messages: 10, tokens: 1_000, files: 5 },
            charge_input_tokens: false,
        }
    }

    fn guest() -> Identity {
        Identity::new("guest-1", UserRole::Guest)
    }

    #[tokio::test]
    async fn test_messages_denied_once_window_is_full() {
        let db = SqliteDatabase::new("sqlite::memory:").await.unwrap();
        let config = config();
        let admission = AdmissionController::new(&db, &config);
        let start = now();

        admission.admit(&guest(), &InboundTurn::text("hi"), start).await.unwrap();
        admission
            .charge("guest-1", QuotaCharge { messages: 2, ..QuotaCharge::default() }, start)
            .await;

        let error = admission.admit(&guest(), &InboundTurn::text("hi"), start).await.unwrap_err();
        assert!(matches!(
            error,
            ChatError::AdmissionDenied { reason: QuotaResource::Messages, period_end } if period_end == start + config.window
        ));
    }

    #[tokio::test]
    async fn test_tokens_checked_after_messages() {
        let db = SqliteDatabase::new("sqlite::memory:").await.unwrap();
        let config = config();
        let admission = AdmissionController::new(&db, &config);
        let start = now();

        admission
            .charge("guest-1", QuotaCharge { tokens: 100, ..QuotaCharge::default() }, start)
            .await;
        let error = admission.admit(&guest(), &InboundTurn::text("hi"), start).await.unwrap_err();
        assert!(matches!(error, ChatError::AdmissionDenied { reason: QuotaResource::Tokens, .. }));
    }

    #[tokio::test]
    async fn test_files_only_checked_when_present() {
        let db = SqliteDatabase::new("sqlite::memory:").await.unwrap();
        let config = config();
        let admission = AdmissionController::new(&db, &config);
        let start = now();

        admission
            .charge("guest-1", QuotaCharge { files: 1, ..QuotaCharge::default() }, start)
            .await;
        admission.admit(&guest(), &InboundTurn::text("no files"), start).await.unwrap();

        let with_file = InboundTurn {
            parts: vec![TurnPart::text("see"), TurnPart::file("store://guest-1/a", "image/png")],
        };
        let error = admission.admit(&guest(), &with_file, start).await.unwrap_err();
        assert!(matches!(error, ChatError::AdmissionDenied { reason: QuotaResource::Files, .. }));
    }

    #[tokio::test]
    async fn test_expired_window_counts_as_zero_without_writing() {
        let db = SqliteDatabase::new("sqlite::memory:").await.unwrap();
        let config = config();
        let admission = AdmissionController::new(&db, &config);
        let start = now();

        admission
            .charge("guest-1", QuotaCharge { messages: 2, ..QuotaCharge::default() }, start)
            .await;
        let later = start + Duration::hours(25);
        admission.admit(&guest(), &InboundTurn::text("hi"), later).await.unwrap();

        let stored = db.get_counter("guest-1", QuotaResource::Messages).await.unwrap().unwrap();
        assert_eq!(stored.counter, 2);
        assert_eq!(stored.period_start, start);
    }

    #[tokio::test]
    async fn test_snapshot_uses_role_limits() {
        let db = SqliteDatabase::new("sqlite::memory:").await.unwrap();
        let config = config();
        let admission = AdmissionController::new(&db, &config);
        let start = now();
        let regular = Identity::new("reg-1", UserRole::Regular);

        admission
            .charge("reg-1", QuotaCharge { messages: 1, tokens: 40, files: 0 }, start)
            .await;
        let snapshot = admission.snapshot(&regular, start).await.unwrap();

        assert_eq!(snapshot.messages.used, 1);
        assert_eq!(snapshot.messages.limit, 10);
        assert_eq!(snapshot.tokens.used, 40);
        assert_eq!(snapshot.files.used, 0);
        assert!(snapshot.files.period_end.is_none());
    }
}

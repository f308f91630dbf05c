//! Membership identifier issuance.
//!
//! The counter is only ever advanced by [`MembershipStore::assign_identity`],
//! which increments it and binds the result to the user in one atomic step.
//! This service adds the idempotent fast path, bounded retry on contention,
//! metrics and the notification.

use crate::engine::EngineEnvironment;
use crate::metrics::IDENTIFIERS_ISSUED_TOTAL;
use crate::retry::{RetryError, RetryPolicy, retry_with_predicate};
use studyhall_core::error::{EngineError, Result, StoreError};
use studyhall_core::membership::{MembershipIdentity, PeriodKey};
use studyhall_core::notify::Notification;
use studyhall_core::store::{AssignOutcome, MembershipStore};
use studyhall_core::types::UserId;

/// Issues each user one sequential identifier, ever.
#[derive(Clone, Debug)]
pub struct SequenceIssuer {
    env: EngineEnvironment,
    policy: RetryPolicy,
}

impl SequenceIssuer {
    /// Create an issuer retrying contention according to `policy`.
    #[must_use]
    pub const fn new(env: EngineEnvironment, policy: RetryPolicy) -> Self {
        Self { env, policy }
    }

    /// Return the user's identifier, issuing it first if needed.
    ///
    /// Concurrent calls for the same user all return the same identity; a
    /// caller that loses the race receives the winner's identity.
    ///
    /// # Errors
    ///
    /// - [`EngineError::SequenceExhausted`] if contention outlasts the retry policy
    /// - [`EngineError::StorageUnavailable`] for any other storage failure
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn issue_identifier(&self, user_id: UserId) -> Result<MembershipIdentity> {
        if let Some(existing) = self.env.memberships.identity_of(user_id).await? {
            return Ok(existing);
        }

        let memberships: &dyn MembershipStore = self.env.memberships.as_ref();
        let outcome = retry_with_predicate(
            &self.policy,
            || {
                let now = self.env.clock.now();
                memberships.assign_identity(user_id, PeriodKey::for_instant(now), now)
            },
            StoreError::is_contention,
        )
        .await;

        match outcome {
            Ok(AssignOutcome::Assigned(identity)) => {
                metrics::counter!(IDENTIFIERS_ISSUED_TOTAL).increment(1);
                tracing::info!(
                    identifier = %identity.identifier,
                    period = %identity.period,
                    sequence = identity.sequence,
                    "Membership identifier issued"
                );
                self.env
                    .notify(
                        user_id,
                        Notification::IdentifierIssued {
                            identifier: identity.identifier.clone(),
                        },
                    )
                    .await;
                Ok(identity)
            }
            Ok(AssignOutcome::Existing(identity)) => {
                tracing::debug!(
                    identifier = %identity.identifier,
                    "Identifier already issued by a concurrent caller"
                );
                Ok(identity)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(attempts, error = %last, "Membership counter unavailable");
                Err(EngineError::SequenceExhausted { attempts })
            }
            Err(RetryError::Permanent(error)) => Err(error.into()),
        }
    }
}

//! HTTP-01 domain ownership validation
//!
//! 🎯 Drives one authorization to a terminal state: publish the challenge
//! response, ask the CA to validate, then poll until it settles.

use crate::acme::{
    AcmeProtocolClient, AuthorizationHandle, AuthorizationState, AuthorizationStatus,
    ChallengeType, Http01Challenge,
};
use crate::challenge::ChallengeResponseStore;
use crate::error::ValidationError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Polling parameters
#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    /// Delay between two status checks
    pub poll_interval: Duration,
    /// Status checks after triggering validation before giving up
    pub max_attempts: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

/// 🎯 Domain ownership validator
pub struct DomainOwnershipValidator {
    client: Arc<dyn AcmeProtocolClient>,
    challenges: ChallengeResponseStore,
    config: ValidatorConfig,
}

impl DomainOwnershipValidator {
    pub fn new(
        client: Arc<dyn AcmeProtocolClient>,
        challenges: ChallengeResponseStore,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            client,
            challenges,
            config,
        }
    }

    /// Validate one authorization.
    ///
    /// Succeeds once the CA reports the authorization valid. The published
    /// challenge response is withdrawn when this returns.
    pub async fn validate(
        &self,
        authorization: &AuthorizationHandle,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let domain = &authorization.domain;
        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled(domain.clone()));
        }

        let state = self.client.fetch_authorization(authorization).await?;
        if state.status == AuthorizationStatus::Valid {
            tracing::info!("✅ Authorization for {} already valid", domain);
            return Ok(());
        }

        let challenge = self
            .client
            .create_challenge(authorization, ChallengeType::Http01)
            .await?;
        self.challenges.put(&challenge.token, &challenge.key_authorization);
        tracing::info!("🚀 Challenge deployed for {}", domain);

        let result = self.await_validation(authorization, &challenge, cancel).await;
        self.challenges.remove(&challenge.token);
        result
    }

    async fn await_validation(
        &self,
        authorization: &AuthorizationHandle,
        challenge: &Http01Challenge,
        cancel: &CancellationToken,
    ) -> Result<(), ValidationError> {
        let domain = &authorization.domain;
        self.client.trigger_validation(challenge).await?;

        for attempt in 1..=self.config.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("🛑 Validation of {} cancelled", domain);
                    return Err(ValidationError::Cancelled(domain.clone()));
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            let state = self.client.fetch_authorization(authorization).await?;
            match state.status {
                AuthorizationStatus::Valid => {
                    tracing::info!("✅ Domain ownership of {} validated", domain);
                    return Ok(());
                }
                AuthorizationStatus::Pending => {
                    tracing::trace!(
                        "⏳ Authorization for {} still pending ({}/{})",
                        domain,
                        attempt,
                        self.config.max_attempts
                    );
                }
                AuthorizationStatus::Invalid => {
                    return Err(ValidationError::Invalid {
                        domain: domain.clone(),
                        reason: invalid_reason(&state),
                    });
                }
                AuthorizationStatus::Revoked => {
                    return Err(ValidationError::Revoked(domain.clone()));
                }
                AuthorizationStatus::Expired => {
                    return Err(ValidationError::Expired(domain.clone()));
                }
                other => {
                    return Err(ValidationError::Unexpected {
                        domain: domain.clone(),
                        status: other.to_string(),
                    });
                }
            }
        }

        Err(ValidationError::TimedOut {
            domain: domain.clone(),
            attempts: self.config.max_attempts,
        })
    }
}

/// Every challenge problem of a failed authorization, `"unknown"` if none
fn invalid_reason(state: &AuthorizationState) -> String {
    if state.challenge_errors.is_empty() {
        tracing::trace!("🔍 No challenge errors reported for invalid {}", state.domain);
        return "unknown".to_string();
    }
    state
        .challenge_errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

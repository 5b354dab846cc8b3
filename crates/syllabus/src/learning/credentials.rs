use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::access::{authorize, Action, Decision, Principal, Resource};
use super::domain::{Completion, CompletionKey, TargetRecord};
use super::error::EngineError;
use super::repository::{ArtifactStore, RecordStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialIssue {
    pub completion: Completion,
    /// False when an earlier call already produced the credential.
    pub newly_issued: bool,
}

/// Checks shared by certificates and badges: aggregate key, enabled on the entity, completed,
/// and requested by the owner or an admin.
fn eligible<S: RecordStore>(
    store: &S,
    actor: &Principal,
    key: &CompletionKey,
    enabled: fn(&TargetRecord) -> bool,
    credential: &str,
) -> Result<(TargetRecord, Completion), EngineError> {
    if !key.is_aggregate() {
        return Err(EngineError::bad_request(format!(
            "{credential}s are issued for course or plan completions, not single items"
        )));
    }
    let record = store
        .target(&key.target)?
        .ok_or_else(|| EngineError::not_found(key.target.to_string()))?;
    if !enabled(&record) {
        return Err(EngineError::bad_request(format!(
            "{} does not offer a {credential}",
            key.target
        )));
    }

    let completion = store
        .completion(key)?
        .filter(|completion| completion.completed_at.is_some())
        .ok_or_else(|| {
            EngineError::bad_request(format!("{} has not completed {}", key.user_id, key.target))
        })?;

    let resource = Resource::target(&record).owned_by(&key.user_id);
    if let Decision::Deny(reason) = authorize(actor, Action::IssueCredential, &resource) {
        warn!(actor = %actor.id, user = %key.user_id, target = %key.target, credential, "issuance denied");
        return Err(EngineError::forbidden(reason));
    }
    Ok((record, completion))
}

pub struct CertificateIssuer<S, A> {
    store: Arc<S>,
    artifacts: Arc<A>,
}

impl<S, A> CertificateIssuer<S, A>
where
    S: RecordStore + 'static,
    A: ArtifactStore + 'static,
{
    pub fn new(store: Arc<S>, artifacts: Arc<A>) -> Self {
        Self { store, artifacts }
    }

    /// Render and stamp the certificate once; later calls return the stored URL.
    pub fn issue(
        &self,
        actor: &Principal,
        key: &CompletionKey,
    ) -> Result<CredentialIssue, EngineError> {
        let (record, completion) = eligible(
            self.store.as_ref(),
            actor,
            key,
            |record: &TargetRecord| record.policy().has_certificate,
            "certificate",
        )?;
        if completion.certificate_url.is_some() {
            debug!(user = %key.user_id, target = %key.target, "certificate already issued");
            return Ok(CredentialIssue {
                completion,
                newly_issued: false,
            });
        }

        let url = self.artifacts.certificate_url(&completion, record.title())?;
        let (stored, newly_issued) = self.store.stamp_certificate(key, url.clone(), Utc::now())?;
        if newly_issued {
            info!(user = %key.user_id, target = %key.target, %url, "certificate issued");
        } else {
            debug!(user = %key.user_id, target = %key.target, "certificate issued concurrently");
        }
        Ok(CredentialIssue {
            completion: stored,
            newly_issued,
        })
    }
}

pub struct BadgeIssuer<S> {
    store: Arc<S>,
}

impl<S> BadgeIssuer<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn award(
        &self,
        actor: &Principal,
        key: &CompletionKey,
    ) -> Result<CredentialIssue, EngineError> {
        let (_, completion) = eligible(
            self.store.as_ref(),
            actor,
            key,
            |record: &TargetRecord| record.policy().has_badge,
            "badge",
        )?;
        if completion.badge_awarded {
            debug!(user = %key.user_id, target = %key.target, "badge already awarded");
            return Ok(CredentialIssue {
                completion,
                newly_issued: false,
            });
        }

        let (stored, newly_issued) = self.store.stamp_badge(key, Utc::now())?;
        if newly_issued {
            info!(user = %key.user_id, target = %key.target, "badge awarded");
        }
        Ok(CredentialIssue {
            completion: stored,
            newly_issued,
        })
    }
}

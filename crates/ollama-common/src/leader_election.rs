//! Lease-based leader election
//!
//! Replicas of the operator compete for a coordination.k8s.io/v1 Lease; only
//! the holder runs controllers. Every write carries the resourceVersion that
//! was read, so two candidates racing for an expired lease cannot both win:
//! the loser's replace fails with 409 Conflict.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{is_conflict, is_not_found};
use crate::FIELD_MANAGER;

/// Lease name used by the operator
pub const LEADER_LEASE_NAME: &str = "ollama-operator-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What a candidate should do with the lease it just read
#[derive(Clone, Debug, PartialEq, Eq)]
enum LeaseAction {
    /// No lease exists yet
    Create,
    /// We hold it; refresh renewTime
    Renew,
    /// Held by someone else but expired
    TakeOver { transitions: i32 },
    /// Held by someone else and still valid
    Wait,
}

fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let Some(lease) = lease else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();

    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    if holder == Some(identity) {
        return LeaseAction::Renew;
    }

    let renewed = spec.and_then(|s| s.renew_time.as_ref());
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (holder, renewed, duration) {
        (None, _, _) | (Some(""), _, _) => true,
        (_, Some(renewed), Some(secs)) => now > renewed.0 + chrono::Duration::seconds(secs.into()),
        _ => true,
    };

    if expired {
        LeaseAction::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    } else {
        LeaseAction::Wait
    }
}

/// Outcome of one renewal round while holding the lease
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Renewal {
    Renewed,
    /// The call failed but our last renewal has not expired yet
    Retry,
    Lost,
}

fn after_renewal(result: &Result<bool, kube::Error>, since_renewal: Duration) -> Renewal {
    match result {
        Ok(true) => Renewal::Renewed,
        Ok(false) => Renewal::Lost,
        Err(_) if since_renewal + RETRY_INTERVAL < LEASE_DURATION => Renewal::Retry,
        Err(_) => Renewal::Lost,
    }
}

/// Competes for the operator Lease
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    /// Elector for `lease_name` in `namespace`, identifying as `identity`
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Block until the lease is held, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => debug!(identity = %self.identity, "Lease held by another candidate"),
                Err(e) => warn!(identity = %self.identity, error = %e, "Lease acquisition failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
        info!(identity = %self.identity, "Leadership acquired");

        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(&self);
        let renewal_task = tokio::spawn(async move { elector.renew_until_lost(lost_tx).await });
        LeaderGuard {
            elector: self,
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn renew_until_lost(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewed = Instant::now();
        let mut wait = RENEW_INTERVAL;
        loop {
            tokio::time::sleep(wait).await;
            let result = self.try_acquire_or_renew().await;
            match after_renewal(&result, last_renewed.elapsed()) {
                Renewal::Renewed => {
                    last_renewed = Instant::now();
                    wait = RENEW_INTERVAL;
                }
                Renewal::Retry => {
                    if let Err(e) = &result {
                        warn!(identity = %self.identity, error = %e, "Lease renewal failed, retrying");
                    }
                    wait = RETRY_INTERVAL;
                }
                Renewal::Lost => {
                    if let Err(e) = &result {
                        warn!(identity = %self.identity, error = %e, "Lease renewal failed");
                    }
                    break;
                }
            }
        }
        warn!(identity = %self.identity, "Leadership lost");
        let _ = lost_tx.send(());
    }

    /// One compare-and-swap round. `Ok(true)` means we hold the lease.
    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let api = self.api();
        let now = Utc::now();
        let current = match api.get(&self.lease_name).await {
            Ok(lease) => Some(lease),
            Err(e) if is_not_found(&e) => None,
            Err(e) => return Err(e),
        };

        let result = match decide(current.as_ref(), &self.identity, now) {
            LeaseAction::Wait => return Ok(false),
            LeaseAction::Create => {
                let lease = self.lease(None, now, now, 0);
                api.create(&PostParams::default(), &lease).await
            }
            LeaseAction::Renew => {
                let mut lease = current.unwrap_or_default();
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                api.replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
            LeaseAction::TakeOver { transitions } => {
                let resource_version = current.and_then(|l| l.metadata.resource_version);
                let lease = self.lease(resource_version, now, now, transitions + 1);
                api.replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn lease(
        &self,
        resource_version: Option<String>,
        acquired: DateTime<Utc>,
        renewed: DateTime<Utc>,
        transitions: i32,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(acquired)),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release(&self) -> Result<(), kube::Error> {
        let api = self.api();
        let lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e),
        };
        if decide(Some(&lease), &self.identity, Utc::now()) != LeaseAction::Renew {
            return Ok(());
        }

        let patch = json!({"spec": {"holderIdentity": null}});
        api.patch(
            &self.lease_name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

/// Held while this replica is leader; renewal stops when dropped
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolve once leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Give up leadership immediately (graceful shutdown)
    pub async fn release(&self) -> Result<(), kube::Error> {
        self.renewal_task.abort();
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEADER_LEASE_NAME.to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(30),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn missing_lease_is_created() {
        assert_eq!(decide(None, "pod-a", Utc::now()), LeaseAction::Create);
    }

    #[test]
    fn own_lease_is_renewed() {
        let now = Utc::now();
        assert_eq!(
            decide(Some(&lease(Some("pod-a"), now, 1)), "pod-a", now),
            LeaseAction::Renew
        );
    }

    #[test]
    fn fresh_foreign_lease_is_respected() {
        let now = Utc::now();
        let held = lease(Some("pod-b"), now - chrono::Duration::seconds(10), 3);
        assert_eq!(decide(Some(&held), "pod-a", now), LeaseAction::Wait);
    }

    #[test]
    fn expired_or_released_lease_is_taken_over() {
        let now = Utc::now();
        let stale = lease(Some("pod-b"), now - chrono::Duration::seconds(31), 3);
        assert_eq!(
            decide(Some(&stale), "pod-a", now),
            LeaseAction::TakeOver { transitions: 3 }
        );

        let released = lease(None, now, 4);
        assert_eq!(
            decide(Some(&released), "pod-a", now),
            LeaseAction::TakeOver { transitions: 4 }
        );
    }

    fn unavailable() -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "etcdserver: request timed out".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        })
    }

    #[test]
    fn failed_renewal_is_retried_while_the_lease_is_valid() {
        assert_eq!(
            after_renewal(&Err(unavailable()), RENEW_INTERVAL),
            Renewal::Retry
        );
        assert_eq!(
            after_renewal(&Err(unavailable()), Duration::from_secs(20)),
            Renewal::Retry
        );
    }

    #[test]
    fn failed_renewal_loses_the_lease_once_it_would_expire() {
        assert_eq!(
            after_renewal(&Err(unavailable()), Duration::from_secs(25)),
            Renewal::Lost
        );
    }

    #[test]
    fn renewal_outcomes() {
        assert_eq!(after_renewal(&Ok(true), Duration::from_secs(29)), Renewal::Renewed);
        assert_eq!(after_renewal(&Ok(false), Duration::ZERO), Renewal::Lost);
    }
}

//! StatefulSet rollout status, as `kubectl rollout status` reports it

use k8s_openapi::api::apps::v1::StatefulSet;

use crate::error::ModelError;

const ROLLING_UPDATE: &str = "RollingUpdate";

/// Rollout state of a StatefulSet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rollout {
    /// Human-readable progress, without kubectl's trailing `...`
    pub message: String,
    /// All replicas are ready at the current revision
    pub ready: bool,
}

impl Rollout {
    fn waiting(message: String) -> Self {
        Self {
            message,
            ready: false,
        }
    }

    fn done(message: String) -> Self {
        Self {
            message,
            ready: true,
        }
    }
}

/// Compute the rollout status of `sts`.
///
/// Only the RollingUpdate strategy can be tracked; anything else is an error.
pub fn rollout_status(sts: &StatefulSet) -> Result<Rollout, ModelError> {
    let spec = sts.spec.as_ref();
    let strategy = spec.and_then(|s| s.update_strategy.as_ref());
    let strategy_type = strategy
        .and_then(|s| s.type_.as_deref())
        .unwrap_or(ROLLING_UPDATE);
    if strategy_type != ROLLING_UPDATE {
        return Err(ModelError::Readiness(format!(
            "rollout status is only available for {ROLLING_UPDATE} strategy type"
        )));
    }

    let status = sts.status.clone().unwrap_or_default();
    let observed = status.observed_generation.unwrap_or(0);
    let generation = sts.metadata.generation.unwrap_or(0);
    if observed == 0 || generation > observed {
        return Ok(Rollout::waiting(
            "Waiting for statefulset spec update to be observed".to_string(),
        ));
    }

    let desired = spec.and_then(|s| s.replicas);
    let ready_replicas = status.ready_replicas.unwrap_or(0);
    if let Some(desired) = desired {
        if ready_replicas < desired {
            return Ok(Rollout::waiting(format!(
                "Waiting for {} pods to be ready",
                desired - ready_replicas
            )));
        }
    }

    let updated = status.updated_replicas.unwrap_or(0);
    if let Some(rolling) = strategy.and_then(|s| s.rolling_update.as_ref()) {
        if let (Some(desired), Some(partition)) = (desired, rolling.partition) {
            if updated < desired - partition {
                return Ok(Rollout::waiting(format!(
                    "Waiting for partitioned roll out to finish: {updated} out of {} new pods have been updated",
                    desired - partition
                )));
            }
        }
        return Ok(Rollout::done(format!(
            "partitioned roll out complete: {updated} new pods have been updated"
        )));
    }

    let update_revision = status.update_revision.unwrap_or_default();
    let current_revision = status.current_revision.unwrap_or_default();
    if update_revision != current_revision {
        return Ok(Rollout::waiting(format!(
            "waiting for statefulset rolling update to complete {updated} pods at revision {update_revision}"
        )));
    }

    Ok(Rollout::done(format!(
        "statefulset rolling update complete {} pods at revision {current_revision}",
        status.current_replicas.unwrap_or(0)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sts(raw: serde_json::Value) -> StatefulSet {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn unobserved_generation_is_not_ready() {
        let rollout = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 2},
            "spec": {"replicas": 1, "selector": {}, "template": {}, "serviceName": "gemma"},
            "status": {"observedGeneration": 1, "replicas": 1},
        })))
        .unwrap();
        assert!(!rollout.ready);
        assert_eq!(
            rollout.message,
            "Waiting for statefulset spec update to be observed"
        );
    }

    #[test]
    fn missing_ready_replicas_are_counted() {
        let rollout = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 1},
            "spec": {"replicas": 1, "selector": {}, "template": {}, "serviceName": "gemma"},
            "status": {"observedGeneration": 1, "replicas": 1, "readyReplicas": 0},
        })))
        .unwrap();
        assert_eq!(
            rollout,
            Rollout {
                message: "Waiting for 1 pods to be ready".to_string(),
                ready: false,
            }
        );
    }

    #[test]
    fn pending_revision_is_not_ready() {
        let rollout = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 3},
            "spec": {"replicas": 1, "selector": {}, "template": {}, "serviceName": "gemma",
                     "updateStrategy": {"type": "RollingUpdate"}},
            "status": {"observedGeneration": 3, "replicas": 1, "readyReplicas": 1,
                       "updatedReplicas": 0, "currentRevision": "gemma-1", "updateRevision": "gemma-2"},
        })))
        .unwrap();
        assert!(!rollout.ready);
        assert_eq!(
            rollout.message,
            "waiting for statefulset rolling update to complete 0 pods at revision gemma-2"
        );
    }

    #[test]
    fn completed_rollout_is_ready() {
        let rollout = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 1},
            "spec": {"replicas": 1, "selector": {}, "template": {}, "serviceName": "gemma"},
            "status": {"observedGeneration": 1, "replicas": 1, "readyReplicas": 1,
                       "currentReplicas": 1, "currentRevision": "gemma-1", "updateRevision": "gemma-1"},
        })))
        .unwrap();
        assert!(rollout.ready);
        assert_eq!(
            rollout.message,
            "statefulset rolling update complete 1 pods at revision gemma-1"
        );
    }

    #[test]
    fn partitioned_rollout_tracks_updated_replicas() {
        let spec = json!({"replicas": 3, "selector": {}, "template": {}, "serviceName": "gemma",
                          "updateStrategy": {"type": "RollingUpdate", "rollingUpdate": {"partition": 1}}});
        let waiting = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 1},
            "spec": spec.clone(),
            "status": {"observedGeneration": 1, "replicas": 3, "readyReplicas": 3, "updatedReplicas": 1},
        })))
        .unwrap();
        assert_eq!(
            waiting.message,
            "Waiting for partitioned roll out to finish: 1 out of 2 new pods have been updated"
        );

        let done = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 1},
            "spec": spec,
            "status": {"observedGeneration": 1, "replicas": 3, "readyReplicas": 3, "updatedReplicas": 2},
        })))
        .unwrap();
        assert!(done.ready);
        assert_eq!(
            done.message,
            "partitioned roll out complete: 2 new pods have been updated"
        );
    }

    #[test]
    fn on_delete_strategy_is_an_error() {
        let err = rollout_status(&sts(json!({
            "metadata": {"name": "gemma", "generation": 1},
            "spec": {"replicas": 1, "selector": {}, "template": {}, "serviceName": "gemma",
                     "updateStrategy": {"type": "OnDelete"}},
        })))
        .unwrap_err();
        assert!(matches!(err, ModelError::Readiness(_)));
    }
}

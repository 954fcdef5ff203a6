//! Status aggregation over the workloads a manifest produced
//!
//! A component's health is derived from its deployments and daemonsets only;
//! every other tracked kind is ignored. The verdict functions are pure, and
//! [`StatusAggregator`] only reads from the store.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, DeploymentCondition};
use stowage_core::{ComponentStatus, TrackedObject};
use tracing::debug;

use crate::error::Result;
use crate::kinds::{Workload, workload_of};
use crate::store::{ObjectKey, ObjectStore, from_dynamic};

const DEPLOYMENTS_PROGRESSING: &str = "1 or more manifest deployments are still progressing";
const DAEMONSETS_PROGRESSING: &str = "1 or more manifest daemonsets are still progressing";
const DEPLOYMENTS_AVAILABLE: &str = "all manifest deployments are available";
const DAEMONSETS_AVAILABLE: &str = "all manifest daemonsets are available";

/// Health of a single workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ready,
    Progressing,
    Failed { reason: String, message: String },
}

impl Verdict {
    fn failed(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Verdict::Failed {
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Classify a deployment
///
/// Ready when available replicas match the desired count and no condition
/// says otherwise. A `Progressing` condition (other than a completed rollout)
/// or a `MinimumReplicasUnavailable` reason means still rolling out; a
/// `ProgressDeadlineExceeded` rollout and every other non-ready condition are
/// hard failures carrying the condition's own reason and message.
pub fn deployment_verdict(deployment: &Deployment) -> Verdict {
    let status = deployment.status.as_ref();
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .or_else(|| status.and_then(|s| s.replicas))
        .unwrap_or(1);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);

    let mut progressing = false;
    for cond in status.and_then(|s| s.conditions.as_deref()).unwrap_or_default() {
        let reason = cond.reason.as_deref().unwrap_or_default();
        match (cond.type_.as_str(), cond.status.as_str(), reason) {
            ("Available", "True", _) => {}
            ("Progressing", _, "ProgressDeadlineExceeded") => return condition_failure(cond),
            ("Progressing", "True", "NewReplicaSetAvailable") => {}
            ("Progressing", _, _) => progressing = true,
            (_, _, "MinimumReplicasUnavailable") => progressing = true,
            _ => return condition_failure(cond),
        }
    }

    if progressing || available != desired {
        Verdict::Progressing
    } else {
        Verdict::Ready
    }
}

fn condition_failure(cond: &DeploymentCondition) -> Verdict {
    let reason = cond
        .reason
        .clone()
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| cond.type_.clone());
    Verdict::failed(reason, cond.message.clone().unwrap_or_default())
}

/// Classify a daemonset
///
/// Ready when every scheduled pod is both ready and available. Misscheduled
/// or unavailable pods are hard failures; anything else is still rolling out.
pub fn daemonset_verdict(daemonset: &DaemonSet) -> Verdict {
    let Some(status) = daemonset.status.as_ref() else {
        return Verdict::Progressing;
    };
    let desired = status.desired_number_scheduled;
    let available = status.number_available.unwrap_or(0);

    if desired == status.number_ready && desired == available {
        return Verdict::Ready;
    }
    if status.number_misscheduled > 0 {
        return Verdict::failed(
            "DaemonSetMisscheduled",
            format!(
                "{} pod(s) of daemonset {} are running where they should not",
                status.number_misscheduled,
                name_of(&daemonset.metadata.name)
            ),
        );
    }
    let unavailable = status.number_unavailable.unwrap_or(0);
    if unavailable > 0 {
        return Verdict::failed(
            "DaemonSetUnavailable",
            format!(
                "{} of {} pod(s) of daemonset {} are unavailable",
                unavailable,
                desired,
                name_of(&daemonset.metadata.name)
            ),
        );
    }
    Verdict::Progressing
}

fn name_of(name: &Option<String>) -> &str {
    name.as_deref().unwrap_or("<unnamed>")
}

/// Rolled-up verdicts of one workload class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub progressing: usize,
    pub failure: Option<(String, String)>,
}

impl Tally {
    /// Fold verdicts, stopping at the first failure
    pub fn from_verdicts(verdicts: impl IntoIterator<Item = Verdict>) -> Self {
        let mut tally = Tally::default();
        for verdict in verdicts {
            match verdict {
                Verdict::Ready => {}
                Verdict::Progressing => tally.progressing += 1,
                Verdict::Failed { reason, message } => {
                    tally.failure = Some((reason, message));
                    break;
                }
            }
        }
        tally
    }
}

/// Combine deployment and daemonset tallies into one status
///
/// When both classes are still progressing the result is labelled
/// `Available` with a "still progressing" message. Callers relying on the
/// type alone will see such components as up.
pub fn combine(deployments: Tally, daemonsets: Tally) -> ComponentStatus {
    if let Some((reason, message)) = deployments.failure {
        return ComponentStatus::unhealthy(reason, message);
    }
    if let Some((reason, message)) = daemonsets.failure {
        return ComponentStatus::unhealthy(reason, message);
    }

    match (deployments.progressing > 0, daemonsets.progressing > 0) {
        (true, true) => ComponentStatus::available(
            "",
            format!("{}, {}", DEPLOYMENTS_PROGRESSING, DAEMONSETS_PROGRESSING),
        ),
        (true, false) => ComponentStatus::progressing("", DEPLOYMENTS_PROGRESSING),
        (false, true) => ComponentStatus::progressing("", DAEMONSETS_PROGRESSING),
        (false, false) => ComponentStatus::available(
            "",
            format!("{}, {}", DEPLOYMENTS_AVAILABLE, DAEMONSETS_AVAILABLE),
        ),
    }
}

/// Status of an empty tracked list
pub fn no_objects() -> ComponentStatus {
    ComponentStatus::unhealthy("NoObjects", "no objects detected")
}

/// Aggregate already-fetched workloads; `None` marks a workload not found
pub fn aggregate(deployments: &[Option<Deployment>], daemonsets: &[Option<DaemonSet>]) -> ComponentStatus {
    let deploy_tally = Tally::from_verdicts(
        deployments
            .iter()
            .map(|d| d.as_ref().map_or(Verdict::Progressing, deployment_verdict)),
    );
    let ds_tally = Tally::from_verdicts(
        daemonsets
            .iter()
            .map(|d| d.as_ref().map_or(Verdict::Progressing, daemonset_verdict)),
    );
    combine(deploy_tally, ds_tally)
}

/// Derives component health from live workload state
pub struct StatusAggregator {
    store: Arc<dyn ObjectStore>,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Compute the health of `component` from its tracked objects
    pub async fn check_status(&self, component: &str, tracked: &[TrackedObject]) -> Result<ComponentStatus> {
        if tracked.is_empty() {
            return Ok(no_objects());
        }

        let mut deployments = Vec::new();
        let mut daemonsets = Vec::new();
        for obj in tracked {
            let Some(workload) = workload_of(obj) else {
                continue;
            };
            let live = self.store.get_opt(&ObjectKey::from_tracked(obj)).await?;
            match workload {
                Workload::Deployment => {
                    deployments.push(live.as_ref().map(from_dynamic::<Deployment>).transpose()?)
                }
                Workload::DaemonSet => {
                    daemonsets.push(live.as_ref().map(from_dynamic::<DaemonSet>).transpose()?)
                }
            }
        }

        let status = aggregate(&deployments, &daemonsets);
        debug!(
            component,
            deployments = deployments.len(),
            daemonsets = daemonsets.len(),
            status = %status.type_,
            "aggregated workload health"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockStore, to_dynamic};
    use k8s_openapi::api::apps::v1::{DaemonSetStatus, DeploymentSpec, DeploymentStatus};
    use stowage_core::StatusType;

    fn condition(type_: &str, status: &str, reason: Option<&str>, message: &str) -> DeploymentCondition {
        DeploymentCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.map(str::to_string),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn deployment(name: &str, replicas: i32, available: i32, conditions: Vec<DeploymentCondition>) -> Deployment {
        let mut d = Deployment::default();
        d.metadata.name = Some(name.to_string());
        d.metadata.namespace = Some("ns".to_string());
        d.spec = Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        });
        d.status = Some(DeploymentStatus {
            replicas: Some(replicas),
            available_replicas: Some(available),
            conditions: (!conditions.is_empty()).then_some(conditions),
            ..Default::default()
        });
        d
    }

    fn daemonset(name: &str, desired: i32, ready: i32, available: i32) -> DaemonSet {
        let mut ds = DaemonSet::default();
        ds.metadata.name = Some(name.to_string());
        ds.metadata.namespace = Some("ns".to_string());
        ds.status = Some(DaemonSetStatus {
            desired_number_scheduled: desired,
            number_ready: ready,
            number_available: Some(available),
            ..Default::default()
        });
        ds
    }

    fn tracked(kind: &str, name: &str) -> TrackedObject {
        TrackedObject::new("apps/v1", kind, name, Some("ns".into()))
    }

    #[test]
    fn test_deployment_ready() {
        assert_eq!(deployment_verdict(&deployment("web", 2, 2, vec![])), Verdict::Ready);
    }

    #[test]
    fn test_deployment_steady_state_conditions_are_ready() {
        let d = deployment(
            "web",
            2,
            2,
            vec![
                condition("Available", "True", Some("MinimumReplicasAvailable"), "ok"),
                condition("Progressing", "True", Some("NewReplicaSetAvailable"), "done"),
            ],
        );
        assert_eq!(deployment_verdict(&d), Verdict::Ready);
    }

    #[test]
    fn test_deployment_progressing() {
        let rolling = deployment("web", 2, 2, vec![condition("Progressing", "True", Some("ReplicaSetUpdated"), "")]);
        assert_eq!(deployment_verdict(&rolling), Verdict::Progressing);

        let min_unavailable = deployment(
            "web",
            2,
            1,
            vec![condition("Available", "False", Some("MinimumReplicasUnavailable"), "")],
        );
        assert_eq!(deployment_verdict(&min_unavailable), Verdict::Progressing);

        let waiting = deployment("web", 3, 1, vec![]);
        assert_eq!(deployment_verdict(&waiting), Verdict::Progressing);
    }

    #[test]
    fn test_deployment_failures_keep_reason() {
        let quota = deployment(
            "web",
            2,
            0,
            vec![condition("ReplicaFailure", "True", Some("FailedCreate"), "exceeded quota")],
        );
        assert_eq!(
            deployment_verdict(&quota),
            Verdict::failed("FailedCreate", "exceeded quota")
        );

        let deadline = deployment(
            "web",
            2,
            1,
            vec![condition("Progressing", "False", Some("ProgressDeadlineExceeded"), "too slow")],
        );
        assert_eq!(
            deployment_verdict(&deadline),
            Verdict::failed("ProgressDeadlineExceeded", "too slow")
        );

        let no_reason = deployment("web", 2, 0, vec![condition("ReplicaFailure", "True", None, "boom")]);
        assert_eq!(deployment_verdict(&no_reason), Verdict::failed("ReplicaFailure", "boom"));
    }

    #[test]
    fn test_daemonset_verdicts() {
        assert_eq!(daemonset_verdict(&daemonset("agent", 3, 3, 3)), Verdict::Ready);
        assert_eq!(daemonset_verdict(&daemonset("agent", 3, 2, 2)), Verdict::Progressing);

        let mut misscheduled = daemonset("agent", 3, 2, 2);
        misscheduled.status.as_mut().unwrap().number_misscheduled = 1;
        assert!(matches!(
            daemonset_verdict(&misscheduled),
            Verdict::Failed { ref reason, .. } if reason == "DaemonSetMisscheduled"
        ));

        let mut unavailable = daemonset("agent", 3, 2, 2);
        unavailable.status.as_mut().unwrap().number_unavailable = Some(1);
        assert!(matches!(
            daemonset_verdict(&unavailable),
            Verdict::Failed { ref reason, .. } if reason == "DaemonSetUnavailable"
        ));

        assert_eq!(daemonset_verdict(&DaemonSet::default()), Verdict::Progressing);
    }

    #[test]
    fn test_available_deployment_and_daemonset() {
        let status = aggregate(
            &[Some(deployment("web", 2, 2, vec![]))],
            &[Some(daemonset("agent", 3, 3, 3))],
        );
        assert_eq!(status.type_, StatusType::Available);
        assert_eq!(
            status.message,
            "all manifest deployments are available, all manifest daemonsets are available"
        );
    }

    #[test]
    fn test_progressing_deployment() {
        let status = aggregate(
            &[Some(deployment("web", 2, 2, vec![condition("Progressing", "True", None, "")]))],
            &[Some(daemonset("agent", 3, 3, 3))],
        );
        assert_eq!(status.type_, StatusType::Progressing);
        assert_eq!(status.message, "1 or more manifest deployments are still progressing");
    }

    #[test]
    fn test_progressing_daemonset_only() {
        let status = aggregate(&[], &[Some(daemonset("agent", 3, 1, 1))]);
        assert_eq!(status.type_, StatusType::Progressing);
        assert_eq!(status.message, DAEMONSETS_PROGRESSING);
    }

    #[test]
    fn test_both_progressing_labelled_available() {
        let status = aggregate(&[None], &[None]);
        assert_eq!(status.type_, StatusType::Available);
        assert!(status.message.contains(DEPLOYMENTS_PROGRESSING));
        assert!(status.message.contains(DAEMONSETS_PROGRESSING));
    }

    #[test]
    fn test_deployment_failure_wins_over_daemonset_failure() {
        let mut bad_ds = daemonset("agent", 3, 2, 2);
        bad_ds.status.as_mut().unwrap().number_misscheduled = 2;
        let status = aggregate(
            &[Some(deployment(
                "web",
                1,
                0,
                vec![condition("ReplicaFailure", "True", Some("FailedCreate"), "quota")],
            ))],
            &[Some(bad_ds)],
        );
        assert_eq!(status.type_, StatusType::Unhealthy);
        assert_eq!(status.reason, "FailedCreate");
        assert_eq!(status.message, "quota");
    }

    #[test]
    fn test_tally_stops_at_first_failure() {
        let tally = Tally::from_verdicts(vec![
            Verdict::Progressing,
            Verdict::failed("A", "first"),
            Verdict::failed("B", "second"),
        ]);
        assert_eq!(tally.progressing, 1);
        assert_eq!(tally.failure, Some(("A".to_string(), "first".to_string())));
    }

    #[test]
    fn test_never_ready() {
        let cases = [
            aggregate(&[], &[]),
            aggregate(&[None], &[]),
            aggregate(&[Some(deployment("web", 1, 1, vec![]))], &[]),
        ];
        assert!(cases.iter().all(|s| s.type_ != StatusType::Ready));
    }

    #[tokio::test]
    async fn test_check_status_empty_is_unhealthy() {
        let aggregator = StatusAggregator::new(Arc::new(MockStore::new()));
        let status = aggregator.check_status("ns/metrics", &[]).await.unwrap();
        assert_eq!(status.type_, StatusType::Unhealthy);
        assert_eq!(status.message, "no objects detected");
        assert!(status.validate().is_ok());
    }

    #[tokio::test]
    async fn test_check_status_reads_live_workloads() {
        let store = MockStore::new();
        store.insert(to_dynamic(&deployment("web", 2, 2, vec![])).unwrap());
        store.insert(to_dynamic(&daemonset("agent", 3, 3, 3)).unwrap());
        let aggregator = StatusAggregator::new(Arc::new(store.clone()));

        let objects = vec![
            TrackedObject::new("v1", "ConfigMap", "cfg", Some("ns".into())),
            tracked("Deployment", "web"),
            tracked("DaemonSet", "agent"),
        ];
        let status = aggregator.check_status("ns/metrics", &objects).await.unwrap();
        assert_eq!(status.type_, StatusType::Available);

        // ConfigMap was never fetched
        assert_eq!(store.operation_counts().gets, 2);
        assert_eq!(store.operation_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_check_status_missing_workload_is_progressing() {
        let aggregator = StatusAggregator::new(Arc::new(MockStore::new()));
        let status = aggregator
            .check_status("ns/metrics", &[tracked("Deployment", "web")])
            .await
            .unwrap();
        assert_eq!(status.type_, StatusType::Progressing);
    }
}

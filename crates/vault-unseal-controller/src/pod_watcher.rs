//! Pod Watcher: subscribes to pod lifecycle events for every instance that
//! declares a `pod_selector`, and enqueues an unseal request on the
//! transitions that plausibly mean "Vault just came back up" — became
//! Ready, restarted in place, or was recreated under the same name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use tracing::{debug, warn};

use crate::descriptor_source::DescriptorSource;
use crate::processor::{UnsealProcessor, UnsealRequest};

/// Snapshot of the pod state we care about for transition detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PodSnapshot {
    ready: bool,
    restart_count: i32,
}

impl PodSnapshot {
    fn from_pod(pod: &Pod) -> Self {
        let ready = pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        let restart_count = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
            .unwrap_or(0);
        PodSnapshot { ready, restart_count }
    }
}

/// The three transitions worth reacting to. Anything else (unready,
/// scheduled, non-restart status churn) is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    BecameReady,
    Restarted,
    Recreated,
}

/// Tracks per-uid snapshots and per-name uid mappings so repeated `Applied`
/// events can be diffed against the previously observed state.
#[derive(Default)]
struct WatchState {
    by_uid: HashMap<String, PodSnapshot>,
    last_uid_by_name: HashMap<String, String>,
}

impl WatchState {
    fn observe(&mut self, uid: &str, name: &str, snapshot: PodSnapshot) -> Option<Transition> {
        let previous_uid = self.last_uid_by_name.get(name).cloned();
        self.last_uid_by_name.insert(name.to_owned(), uid.to_owned());

        let transition = if let Some(previous_uid) = previous_uid {
            if previous_uid != uid {
                Some(Transition::Recreated)
            } else {
                match self.by_uid.get(uid) {
                    Some(prev) if !prev.ready && snapshot.ready => Some(Transition::BecameReady),
                    Some(prev) if snapshot.restart_count > prev.restart_count => {
                        Some(Transition::Restarted)
                    }
                    Some(_) => None,
                    None => snapshot.ready.then_some(Transition::BecameReady),
                }
            }
        } else {
            snapshot.ready.then_some(Transition::BecameReady)
        };

        self.by_uid.insert(uid.to_owned(), snapshot);
        transition
    }

    fn remove(&mut self, uid: &str) {
        self.by_uid.remove(uid);
    }
}

/// Runs the pod watch loop until the underlying stream ends (normally: the
/// process is shutting down). Intended to be spawned as its own task.
pub async fn run(
    client: Client,
    descriptors: Arc<dyn DescriptorSource>,
    processor: Arc<UnsealProcessor>,
) {
    let pods: Api<Pod> = Api::all(client);
    let mut state = WatchState::default();
    let mut stream = Box::pin(watcher::watcher(pods, watcher::Config::default()).boxed());

    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(pod)) => handle_applied(&pod, &mut state, descriptors.as_ref(), processor.as_ref()).await,
            Ok(Event::InitApply(pod)) => {
                handle_applied(&pod, &mut state, descriptors.as_ref(), processor.as_ref()).await;
            }
            Ok(Event::Delete(pod)) => {
                if let Some(uid) = pod.metadata.uid.as_deref() {
                    state.remove(uid);
                }
            }
            Ok(Event::Init | Event::InitDone) => {}
            Err(err) => {
                warn!(%err, "pod watch stream error");
            }
        }
    }
    debug!("pod watch stream ended");
}

async fn handle_applied(
    pod: &Pod,
    state: &mut WatchState,
    descriptors: &dyn DescriptorSource,
    processor: &UnsealProcessor,
) {
    let Some(uid) = pod.metadata.uid.clone() else {
        return;
    };
    let Some(name) = pod.metadata.name.clone() else {
        return;
    };
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let labels: BTreeMap<String, String> = pod.metadata.labels.clone().unwrap_or_default().into_iter().collect();

    let snapshot = PodSnapshot::from_pod(pod);
    let Some(transition) = state.observe(&uid, &name, snapshot) else {
        return;
    };

    debug!(pod = %name, namespace = %namespace, ?transition, "relevant pod transition detected");

    let Some((resource_key, instance_name)) = descriptors.resolve_pod(&namespace, &labels).await else {
        return;
    };

    processor
        .enqueue(UnsealRequest::new(resource_key, instance_name))
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ready(restart_count: i32) -> PodSnapshot {
        PodSnapshot {
            ready: true,
            restart_count,
        }
    }

    fn not_ready() -> PodSnapshot {
        PodSnapshot {
            ready: false,
            restart_count: 0,
        }
    }

    #[test]
    fn first_sighting_ready_reports_became_ready() {
        let mut state = WatchState::default();
        let transition = state.observe("uid-1", "pod-a", ready(0));
        assert_eq!(transition, Some(Transition::BecameReady));
    }

    #[test]
    fn first_sighting_not_ready_reports_nothing() {
        let mut state = WatchState::default();
        let transition = state.observe("uid-1", "pod-a", not_ready());
        assert_eq!(transition, None);
    }

    #[test]
    fn ready_transition_is_detected_once() {
        let mut state = WatchState::default();
        state.observe("uid-1", "pod-a", not_ready());
        let transition = state.observe("uid-1", "pod-a", ready(0));
        assert_eq!(transition, Some(Transition::BecameReady));

        let transition = state.observe("uid-1", "pod-a", ready(0));
        assert_eq!(transition, None, "steady ready state should not re-fire");
    }

    #[test]
    fn restart_count_increase_reports_restarted() {
        let mut state = WatchState::default();
        state.observe("uid-1", "pod-a", ready(0));
        let transition = state.observe("uid-1", "pod-a", ready(1));
        assert_eq!(transition, Some(Transition::Restarted));
    }

    #[test]
    fn uid_change_under_stable_name_reports_recreated() {
        let mut state = WatchState::default();
        state.observe("uid-1", "pod-a", ready(0));
        let transition = state.observe("uid-2", "pod-a", not_ready());
        assert_eq!(transition, Some(Transition::Recreated));
    }

    #[test]
    fn delete_forgets_uid_state_but_not_name_mapping() {
        let mut state = WatchState::default();
        state.observe("uid-1", "pod-a", ready(0));
        state.remove("uid-1");
        assert!(!state.by_uid.contains_key("uid-1"));
        assert_eq!(state.last_uid_by_name.get("pod-a"), Some(&"uid-1".to_owned()));
    }
}

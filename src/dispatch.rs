//! Watch event dispatch
//!
//! Two loops run side by side: one watches `CouchDB` resources and feeds the
//! scale reconciler, the other watches member pods and feeds the bootstrap
//! orchestrator. A kube watcher only reports "applied" and "deleted", so each
//! loop keeps an [`EventClassifier`] that turns the raw stream back into
//! added/updated/deleted notifications.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, Resource};
use tracing::{debug, info, warn};

use crate::controller::{self, Context};
use crate::crd::CouchDB;
use crate::workload::MemberPod;
use crate::{APP_NAME, LABEL_APP};

/// Pause after a watch error before polling the stream again
pub const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// A classified change to a watched object
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceEvent<K> {
    /// First sighting of the object
    Added(K),
    /// The object changed since it was last seen
    Updated {
        /// Last observed version
        old: K,
        /// Current version
        new: K,
    },
    /// The object is gone
    Deleted(K),
}

/// Event on a `CouchDB` resource
pub type ClusterEvent = ResourceEvent<CouchDB>;

/// Event on a pod
pub type PodEvent = ResourceEvent<Pod>;

/// Turns raw watcher events into [`ResourceEvent`]s
///
/// Remembers the last version of every live object so a later apply can be
/// reported with its predecessor. Objects missing from a relist are reported
/// as deleted with their last known version.
pub struct EventClassifier<K>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    known: HashMap<ObjectRef<K>, K>,
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K> Default for EventClassifier<K>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

impl<K> EventClassifier<K>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    /// Classifier with nothing remembered
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently remembered
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Returns true if nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Classify one watcher event
    ///
    /// Most events map to at most one classified event. The end of a relist
    /// reports every remembered object that was not listed again as deleted,
    /// since it went away while the watch was down.
    pub fn classify(&mut self, event: Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            Event::Apply(obj) => vec![self.apply(obj)],
            Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(ObjectRef::from_obj(&obj));
                }
                vec![self.apply(obj)]
            }
            Event::Delete(obj) => {
                self.known.remove(&ObjectRef::from_obj(&obj));
                vec![ResourceEvent::Deleted(obj)]
            }
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let missing: Vec<ObjectRef<K>> = self
                    .known
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    debug!(count = missing.len(), "objects missing from relist");
                }
                missing
                    .iter()
                    .filter_map(|key| self.known.remove(key))
                    .map(ResourceEvent::Deleted)
                    .collect()
            }
        }
    }

    fn apply(&mut self, obj: K) -> ResourceEvent<K> {
        match self.known.insert(ObjectRef::from_obj(&obj), obj.clone()) {
            Some(old) => ResourceEvent::Updated { old, new: obj },
            None => ResourceEvent::Added(obj),
        }
    }
}

/// Route one `CouchDB` event to the scale reconciler
pub async fn handle_cluster_event(event: ClusterEvent, ctx: &Context) {
    match event {
        ResourceEvent::Added(cluster) => {
            controller::on_cluster_added(&cluster, ctx).await;
        }
        ResourceEvent::Updated { old, new } => {
            controller::on_cluster_updated(&old, &new).await;
        }
        ResourceEvent::Deleted(cluster) => {
            controller::on_cluster_deleted(&cluster, ctx).await;
        }
    }
}

/// Route one pod event to the bootstrap orchestrator
///
/// Pods that are not cluster members are dropped. Only updates can move a
/// cluster towards bootstrap; additions and deletions are logged.
pub async fn handle_pod_event(event: PodEvent, ctx: &Context) {
    match event {
        ResourceEvent::Added(pod) => {
            if let Some(member) = MemberPod::from_pod(&pod) {
                controller::on_pod_added(&member);
            }
        }
        ResourceEvent::Updated { new, .. } => {
            if let Some(member) = MemberPod::from_pod(&new) {
                let phase = controller::on_pod_updated(&member, ctx).await;
                debug!(pod = %member.name, cluster = %member.cluster, %phase, "bootstrap attempt finished");
            }
        }
        ResourceEvent::Deleted(pod) => {
            if let Some(member) = MemberPod::from_pod(&pod) {
                controller::on_pod_deleted(&member);
            }
        }
    }
}

/// Watch `CouchDB` resources in every namespace until the stream ends
pub async fn run_cluster_loop(client: Client, ctx: Arc<Context>) {
    let api: Api<CouchDB> = Api::all(client);
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();
    let mut classifier = EventClassifier::new();

    info!("starting couchdb resource watch");
    while let Some(next) = stream.next().await {
        match next {
            Ok(event) => {
                for event in classifier.classify(event) {
                    handle_cluster_event(event, &ctx).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "couchdb resource watch failed, retrying");
                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        }
    }
    info!("couchdb resource watch stopped");
}

/// Watch member pods in every namespace until the stream ends
pub async fn run_pod_loop(client: Client, ctx: Arc<Context>) {
    let api: Api<Pod> = Api::all(client);
    let config = watcher::Config::default().labels(&format!("{}={}", LABEL_APP, APP_NAME));
    let mut stream = watcher::watcher(api, config).boxed();
    let mut classifier = EventClassifier::new();

    info!("starting member pod watch");
    while let Some(next) = stream.next().await {
        match next {
            Ok(event) => {
                for event in classifier.classify(event) {
                    handle_pod_event(event, &ctx).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "member pod watch failed, retrying");
                tokio::time::sleep(WATCH_RETRY_DELAY).await;
            }
        }
    }
    info!("member pod watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kube::api::ObjectMeta;
    use mockall::predicate::{always, eq};

    use crate::controller::{MockClusterStore, MockPodFleet};
    use crate::crd::CouchDbSpec;
    use crate::couchdb::MockCouchDbAdmin;
    use crate::credentials::MockKeyValueStore;

    fn pod(name: &str, version: &str, labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("db".to_string()),
                resource_version: Some(version.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    const MEMBER: &[(&str, &str)] = &[("app", "couchdb"), ("cluster", "books")];

    fn silent_context(store: MockClusterStore) -> Context {
        let mut fleet = MockPodFleet::new();
        fleet.expect_create_pod().never();
        fleet.expect_delete_pod().never();
        let mut admin = MockCouchDbAdmin::new();
        admin.expect_add_node().never();
        Context::for_testing(
            Arc::new(fleet),
            Arc::new(store),
            Arc::new(MockKeyValueStore::new()),
            Arc::new(admin),
        )
    }

    /// Story: first apply is an add, later applies carry the old version
    #[test]
    fn story_applies_become_added_then_updated() {
        let mut classifier = EventClassifier::new();

        let first = classifier.classify(Event::Apply(pod("a", "1", MEMBER)));
        assert_eq!(first, vec![ResourceEvent::Added(pod("a", "1", MEMBER))]);

        let second = classifier.classify(Event::Apply(pod("a", "2", MEMBER)));
        assert_eq!(
            second,
            vec![ResourceEvent::Updated {
                old: pod("a", "1", MEMBER),
                new: pod("a", "2", MEMBER),
            }]
        );
        assert_eq!(classifier.len(), 1);
    }

    #[test]
    fn delete_forgets_the_object() {
        let mut classifier = EventClassifier::new();
        classifier.classify(Event::Apply(pod("a", "1", MEMBER)));

        let deleted = classifier.classify(Event::Delete(pod("a", "2", MEMBER)));
        assert_eq!(deleted, vec![ResourceEvent::Deleted(pod("a", "2", MEMBER))]);
        assert!(classifier.is_empty());

        let again = classifier.classify(Event::Apply(pod("a", "3", MEMBER)));
        assert_eq!(again, vec![ResourceEvent::Added(pod("a", "3", MEMBER))]);
    }

    #[test]
    fn same_name_in_other_namespace_is_a_distinct_object() {
        let mut classifier = EventClassifier::new();
        classifier.classify(Event::Apply(pod("a", "1", MEMBER)));

        let mut other = pod("a", "1", MEMBER);
        other.metadata.namespace = Some("other".to_string());
        let event = classifier.classify(Event::Apply(other.clone()));
        assert_eq!(event, vec![ResourceEvent::Added(other)]);
    }

    /// Story: objects that vanished while the watch was down are reported
    /// as deleted once the relist completes
    #[test]
    fn story_relist_reports_vanished_objects_as_deleted() {
        let mut classifier = EventClassifier::new();
        classifier.classify(Event::Apply(pod("a", "1", MEMBER)));
        classifier.classify(Event::Apply(pod("b", "1", MEMBER)));

        assert!(classifier.classify(Event::Init).is_empty());
        let relisted = classifier.classify(Event::InitApply(pod("a", "2", MEMBER)));
        assert!(matches!(relisted[..], [ResourceEvent::Updated { .. }]));

        let done = classifier.classify(Event::InitDone);
        assert_eq!(done, vec![ResourceEvent::Deleted(pod("b", "1", MEMBER))]);
        assert_eq!(classifier.len(), 1);

        let b = classifier.classify(Event::Apply(pod("b", "3", MEMBER)));
        assert!(matches!(b[..], [ResourceEvent::Added(_)]));
    }

    #[test]
    fn initial_list_reports_everything_as_added() {
        let mut classifier = EventClassifier::new();
        classifier.classify(Event::Init);
        let event = classifier.classify(Event::InitApply(pod("a", "1", MEMBER)));
        let done = classifier.classify(Event::InitDone);

        assert!(matches!(event[..], [ResourceEvent::Added(_)]));
        assert!(done.is_empty());
        assert_eq!(classifier.len(), 1);
    }

    #[test]
    fn init_done_without_init_reports_nothing() {
        let mut classifier = EventClassifier::new();
        classifier.classify(Event::Apply(pod("a", "1", MEMBER)));

        assert!(classifier.classify(Event::InitDone).is_empty());
        assert_eq!(classifier.len(), 1);
    }

    /// Story: a cluster deleted during a watch outage still loses its pods
    #[tokio::test]
    async fn story_cluster_missing_from_relist_is_torn_down() {
        let cluster = CouchDB {
            metadata: ObjectMeta {
                name: Some("books".to_string()),
                namespace: Some("db".to_string()),
                ..Default::default()
            },
            spec: CouchDbSpec {
                version: "2.1.0".to_string(),
                base_image: "nicolai86/couchdb".to_string(),
                size: 2,
                pod: None,
            },
            status: None,
        };
        let mut classifier = EventClassifier::new();
        classifier.classify(Event::Apply(cluster));
        classifier.classify(Event::Init);
        let events = classifier.classify(Event::InitDone);
        assert_eq!(events.len(), 1);

        let mut fleet = MockPodFleet::new();
        fleet
            .expect_list_members()
            .with(eq("db"), eq("books"))
            .times(1)
            .returning(|_, _| Ok(vec![pod("couchdb-0", "1", MEMBER), pod("couchdb-1", "1", MEMBER)]));
        fleet
            .expect_delete_pod()
            .with(eq("db"), always())
            .times(2)
            .returning(|_, _| Ok(()));
        fleet.expect_create_pod().never();
        let mut admin = MockCouchDbAdmin::new();
        admin.expect_add_node().never();
        let ctx = Context::for_testing(
            Arc::new(fleet),
            Arc::new(MockClusterStore::new()),
            Arc::new(MockKeyValueStore::new()),
            Arc::new(admin),
        );

        for event in events {
            handle_cluster_event(event, &ctx).await;
        }
    }

    /// Story: pods that are not cluster members never reach bootstrap
    #[tokio::test]
    async fn story_foreign_pod_updates_are_dropped() {
        let mut store = MockClusterStore::new();
        store.expect_get().never();
        let ctx = silent_context(store);

        for labels in [&[("app", "nginx"), ("cluster", "books")][..], &[("app", "couchdb")][..]] {
            handle_pod_event(
                ResourceEvent::Updated {
                    old: pod("x", "1", labels),
                    new: pod("x", "2", labels),
                },
                &ctx,
            )
            .await;
        }
    }

    #[tokio::test]
    async fn member_pod_update_triggers_bootstrap() {
        let mut store = MockClusterStore::new();
        store
            .expect_get()
            .with(eq("db"), eq("books"))
            .times(1)
            .returning(|_, _| Ok(None));
        let ctx = silent_context(store);

        handle_pod_event(
            ResourceEvent::Updated {
                old: pod("couchdb-0", "1", MEMBER),
                new: pod("couchdb-0", "2", MEMBER),
            },
            &ctx,
        )
        .await;
    }

    #[tokio::test]
    async fn member_pod_add_and_delete_are_only_logged() {
        let mut store = MockClusterStore::new();
        store.expect_get().never();
        let ctx = silent_context(store);

        handle_pod_event(ResourceEvent::Added(pod("couchdb-0", "1", MEMBER)), &ctx).await;
        handle_pod_event(ResourceEvent::Deleted(pod("couchdb-0", "2", MEMBER)), &ctx).await;
    }
}

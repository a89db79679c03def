//! Resource change feeds.
//!
//! A feed wraps a kube watcher and a reflector store. Before each watcher
//! event is applied to the store, the feed looks up the cached snapshot so
//! that filters see Add/Update/Delete notifications with both the old and
//! the new object.
//!
//! After a re-list, objects that were cached but are missing from the new
//! listing are reported as tombstones carrying their last known state.

use crate::element::Element;
use crate::error::ControllerError;
use crate::filter::ResourceFilter;
use crate::queue::WorkQueue;
use crate::reconcile_helpers::meta_namespace_key;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::{Api, Client, Resource};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Object removed from the cluster.
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// Delete event carrying the final object
    Known(Arc<K>),
    /// Object that vanished while the watch was down
    Tombstone { key: String, last_known: Arc<K> },
}

impl<K: Resource> DeletedObject<K> {
    /// Cache key of the deleted object.
    pub fn key(&self) -> Option<String> {
        match self {
            DeletedObject::Known(obj) => meta_namespace_key(obj.meta()),
            DeletedObject::Tombstone { key, .. } => Some(key.clone()),
        }
    }

    /// Last snapshot seen before the deletion.
    pub fn last_known(&self) -> &K {
        match self {
            DeletedObject::Known(obj) => obj,
            DeletedObject::Tombstone { last_known, .. } => last_known,
        }
    }
}

/// A change notification handed to a filter.
#[derive(Debug, Clone)]
pub enum Change<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(DeletedObject<K>),
}

/// Passes a change to the matching filter hook.
pub fn route<K, F>(change: &Change<K>, filter: &F) -> Vec<Element>
where
    F: ResourceFilter<K> + ?Sized,
{
    match change {
        Change::Added(obj) => filter.on_add(obj),
        Change::Updated { old, new } => filter.on_update(old, new),
        Change::Deleted(deleted) => filter.on_delete(deleted),
    }
}

/// Bounds shared by every watched kind.
pub trait Watched: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static {}

impl<K> Watched for K where K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static {}

/// Cache plus old/new diffing for one kind.
pub struct ChangeFeed<K: Watched> {
    writer: Writer<K>,
    reader: Store<K>,
    relist: Option<HashSet<ObjectRef<K>>>,
}

impl<K: Watched> Default for ChangeFeed<K> {
    fn default() -> Self {
        let writer = Writer::default();
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            relist: None,
        }
    }
}

impl<K: Watched> ChangeFeed<K> {
    /// Read handle on the cache. Becomes ready after the first full listing.
    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }

    /// Converts a watcher event into change notifications and applies it to the cache.
    pub fn observe(&mut self, event: &watcher::Event<K>) -> Vec<Change<K>> {
        let changes = match event {
            watcher::Event::Apply(obj) => vec![self.applied(obj)],
            watcher::Event::Delete(obj) => vec![Change::Deleted(DeletedObject::Known(Arc::new(obj.clone())))],
            watcher::Event::Init => {
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relist.as_mut() {
                    seen.insert(ObjectRef::from_obj(obj));
                }
                vec![self.applied(obj)]
            }
            watcher::Event::InitDone => self.vanished(),
        };

        self.writer.apply_watcher_event(event);
        changes
    }

    fn applied(&self, obj: &K) -> Change<K> {
        let new = Arc::new(obj.clone());
        match self.reader.get(&ObjectRef::from_obj(obj)) {
            Some(old) => Change::Updated { old, new },
            None => Change::Added(new),
        }
    }

    fn vanished(&mut self) -> Vec<Change<K>> {
        let seen = self.relist.take().unwrap_or_default();
        self.reader
            .state()
            .into_iter()
            .filter(|obj| !seen.contains(&ObjectRef::from_obj(obj.as_ref())))
            .filter_map(|obj| {
                let key = meta_namespace_key(obj.meta())?;
                debug!("{} {} disappeared during relist", K::kind(&()), key);
                Some(Change::Deleted(DeletedObject::Tombstone { key, last_known: obj }))
            })
            .collect()
    }
}

/// Resolves once `store` has completed its first full listing.
pub fn sync_barrier<K: Watched>(store: Store<K>) -> BoxFuture<'static, Result<(), ControllerError>> {
    async move {
        store
            .wait_until_ready()
            .await
            .map_err(|e| ControllerError::CacheSync(format!("{}: {}", K::kind(&()), e)))
    }
    .boxed()
}

/// Registers change feeds that push filtered elements into the work queue.
pub trait FeedRegistrar {
    /// Starts a feed for `K` and returns its cache.
    fn subscribe<K, F>(&mut self, config: watcher::Config, filter: F, queue: &WorkQueue<Element>) -> Store<K>
    where
        K: Watched,
        F: ResourceFilter<K> + 'static;
}

/// Change feeds backed by the Kubernetes API.
pub struct KubeFeeds {
    client: Client,
    tasks: Vec<JoinHandle<()>>,
}

impl KubeFeeds {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tasks: Vec::new(),
        }
    }

    /// Watch tasks started so far.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

impl FeedRegistrar for KubeFeeds {
    fn subscribe<K, F>(&mut self, config: watcher::Config, filter: F, queue: &WorkQueue<Element>) -> Store<K>
    where
        K: Watched,
        F: ResourceFilter<K> + 'static,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let mut feed = ChangeFeed::<K>::default();
        let store = feed.store();
        let queue = queue.clone();

        let task = tokio::spawn(async move {
            let kind = K::kind(&());
            info!("Starting {} watcher", kind);

            let mut events = watcher(api, config).default_backoff().boxed();
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        for change in feed.observe(&event) {
                            for element in route(&change, &filter) {
                                queue.add(element);
                            }
                        }
                    }
                    // The backoff keeps retrying; the stream does not end on errors
                    Err(e) => warn!("{} watcher error: {}", kind, e),
                }
            }
            info!("{} watcher stopped", kind);
        });

        self.tasks.push(task);
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PodFilter;
    use crate::element::ElementKind;
    use crate::test_utils::*;
    use crds::SelectorType;
    use k8s_openapi::api::core::v1::{Node, Pod};
    use std::time::Duration;

    #[test]
    fn test_apply_reports_added_then_updated() {
        let mut feed = ChangeFeed::<Node>::default();

        let changes = feed.observe(&watcher::Event::Apply(create_test_node("n", "1", &[])));
        assert!(matches!(changes.as_slice(), [Change::Added(_)]));

        let changes = feed.observe(&watcher::Event::Apply(create_test_node("n", "2", &[])));
        match changes.as_slice() {
            [Change::Updated { old, new }] => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("unexpected changes {:?}", other),
        }
    }

    #[test]
    fn test_delete_reports_known_object() {
        let mut feed = ChangeFeed::<Node>::default();
        feed.observe(&watcher::Event::Apply(create_test_node("n", "1", &[])));

        let changes = feed.observe(&watcher::Event::Delete(create_test_node("n", "2", &[])));
        match changes.as_slice() {
            [Change::Deleted(deleted @ DeletedObject::Known(_))] => {
                assert_eq!(deleted.key().as_deref(), Some("n"));
            }
            other => panic!("unexpected changes {:?}", other),
        }
        assert!(feed.store().state().is_empty());
    }

    #[test]
    fn test_relist_reports_vanished_objects_as_tombstones() {
        let mut feed = ChangeFeed::<Pod>::default();
        for event in [
            watcher::Event::Init,
            watcher::Event::InitApply(create_test_pod("default", "a", "1", true)),
            watcher::Event::InitApply(create_test_pod("default", "b", "1", true)),
            watcher::Event::InitDone,
        ] {
            feed.observe(&event);
        }
        assert_eq!(feed.store().state().len(), 2);

        // Watch restarts; "b" was deleted while disconnected
        assert!(feed.observe(&watcher::Event::Init).is_empty());
        let changes = feed.observe(&watcher::Event::InitApply(create_test_pod("default", "a", "2", true)));
        assert!(matches!(changes.as_slice(), [Change::Updated { .. }]));

        let changes = feed.observe(&watcher::Event::InitDone);
        match changes.as_slice() {
            [Change::Deleted(DeletedObject::Tombstone { key, last_known })] => {
                assert_eq!(key, "default/b");
                assert_eq!(last_known.metadata.resource_version.as_deref(), Some("1"));
            }
            other => panic!("unexpected changes {:?}", other),
        }
        assert_eq!(feed.store().state().len(), 1);
    }

    #[tokio::test]
    async fn test_store_ready_after_initial_listing() {
        let mut feed = ChangeFeed::<Node>::default();
        let barrier = sync_barrier(feed.store());

        feed.observe(&watcher::Event::Init);
        feed.observe(&watcher::Event::InitApply(create_test_node(TEST_NODE, "1", &[])));
        feed.observe(&watcher::Event::InitDone);

        tokio::time::timeout(Duration::from_secs(1), barrier)
            .await
            .expect("barrier should resolve")
            .expect("store should be ready");
    }

    #[test]
    fn test_route_through_pod_filter() {
        let mut feed = ChangeFeed::<Pod>::default();
        let mut routed = Vec::new();
        for event in [
            watcher::Event::Apply(create_test_pod("default", "p", "1", false)),
            watcher::Event::Apply(create_test_pod("default", "p", "2", true)),
            watcher::Event::Apply(create_test_pod("default", "p", "2", true)),
        ] {
            for change in feed.observe(&event) {
                routed.extend(route(&change, &PodFilter));
            }
        }

        assert_eq!(routed, vec![Element::new(ElementKind::Pod, "default/p", SelectorType::Pod)]);
    }
}

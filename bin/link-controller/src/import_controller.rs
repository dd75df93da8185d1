//! Import controller: watches feed the work queue, workers reconcile

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::ObjectMeta;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::{self, Store};
use kube_runtime::watcher::{self, Event};
use kube_runtime::WatchStreamExt;
use link_api::{Import, ImportKey};
use link_core::triggers;
use link_core::{ObjectStore, Reconciler, ReconcilerConfig, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct ImportController<S> {
    client: Client,
    reconciler: Arc<Reconciler<S>>,
    queue: Arc<WorkQueue<ImportKey>>,
    workers: usize,
    resync: Duration,
}

impl<S: ObjectStore> ImportController<S> {
    pub fn new(client: Client, reconciler: Arc<Reconciler<S>>, workers: usize, resync: Duration) -> Self {
        Self {
            client,
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            workers,
            resync,
        }
    }

    /// Stop handing out work; running passes finish
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!(workers = self.workers, "Starting Import reconciliation");

        let (imports, writer) = reflector::store::<Import>();

        let mut workers = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let queue = self.queue.clone();
            let reconciler = self.reconciler.clone();
            let imports = imports.clone();
            workers.push(tokio::spawn(async move {
                while let Some((key, ticket)) = queue.next().await {
                    let outcome = reconciler.reconcile_with_retry(&key, &ticket).await;
                    debug!(worker = id, import = %key, ?outcome, "Reconciled import");
                    queue.done(&key);

                    // a port freed by this pass may unblock conflicted peers
                    let state = imports.state();
                    for waiter in reconciler.take_port_waiters(state.iter().map(|i| i.as_ref())) {
                        debug!(import = %waiter, "Port freed, requeueing waiting import");
                        queue.enqueue(waiter);
                    }
                }
            }));
        }

        let import_events = watcher(Api::<Import>::all(self.client.clone())).reflect(writer);
        let service_events = watcher(Api::<Service>::all(self.client.clone()));
        let slice_events = watcher(Api::<EndpointSlice>::all(self.client.clone()));
        let config = self.reconciler.config();

        tokio::select! {
            _ = self.watch_imports(import_events, &imports) => warn!("Import watch ended"),
            _ = self.watch_related(service_events, &imports, |meta, keys| {
                triggers::imports_for_service(meta, keys, config)
            }) => warn!("Service watch ended"),
            _ = self.watch_related(slice_events, &imports, |meta, keys| {
                triggers::imports_for_endpoint_slice(meta, keys, config)
            }) => warn!("EndpointSlice watch ended"),
            _ = self.resync_loop(&imports) => {},
        }

        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Reconcile worker failed: {}", e);
            }
        }
        Ok(())
    }

    async fn watch_imports(
        &self,
        events: impl Stream<Item = Result<Event<Import>, watcher::Error>>,
        imports: &Store<Import>,
    ) {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Apply(import) | Event::InitApply(import) | Event::Delete(import)) => {
                    let key = import.key();
                    self.queue.enqueue(key.clone());
                    let state = imports.state();
                    for peer in triggers::imports_for_port_release(&key, state.iter().map(|i| i.as_ref())) {
                        self.queue.enqueue(peer);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Import watch error: {}", e),
            }
        }
    }

    async fn watch_related<K>(
        &self,
        events: impl Stream<Item = Result<Event<K>, watcher::Error>>,
        imports: &Store<Import>,
        affected: impl Fn(&ObjectMeta, &[ImportKey]) -> Vec<ImportKey>,
    ) where
        K: Resource,
    {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Apply(obj) | Event::InitApply(obj) | Event::Delete(obj)) => {
                    let known = known_imports(imports);
                    for key in affected(obj.meta(), &known) {
                        self.queue.enqueue(key);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("{} watch error: {}", std::any::type_name::<K>(), e),
            }
        }
    }

    async fn resync_loop(&self, imports: &Store<Import>) {
        let mut interval = tokio::time::interval(self.resync);
        interval.tick().await;
        loop {
            interval.tick().await;
            let known = known_imports(imports);
            debug!("Resyncing {} imports", known.len());
            for key in known {
                self.queue.enqueue(key);
            }
        }
    }
}

fn watcher<K>(api: Api<K>) -> impl Stream<Item = Result<Event<K>, watcher::Error>>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + Send + 'static,
{
    watcher::watcher(api, watcher::Config::default()).default_backoff()
}

fn known_imports(imports: &Store<Import>) -> Vec<ImportKey> {
    imports.state().iter().map(|import| import.key()).collect()
}

use std::sync::Arc;

use rpmrepo_config::config::Config;
use rpmrepo_core::{Createrepo, IndexTool, MergeTool, RepoLayout, Result};
use rpmrepo_events::{EventSink, EventSinkHandle, RepoEvent};
use rpmrepo_store::{LocalStore, ObjectStore, StoreHandle};
use tracing::debug;

struct ContextInner {
    config: Config,
    layout: RepoLayout,
    store: StoreHandle,
    indexer: Arc<dyn IndexTool>,
    merger: Arc<dyn MergeTool>,
    events: EventSinkHandle,
}

/// Everything an invocation needs. Clones share the same store, tools and sink.
#[derive(Clone)]
pub struct RepoContext {
    inner: Arc<ContextInner>,
}

impl RepoContext {
    pub fn new(
        config: Config,
        store: StoreHandle,
        indexer: Arc<dyn IndexTool>,
        merger: Arc<dyn MergeTool>,
        events: EventSinkHandle,
    ) -> Result<Self> {
        let layout = RepoLayout::from_config(&config)?;
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                layout,
                store,
                indexer,
                merger,
                events,
            }),
        })
    }

    /// Local store at `store_path`, `createrepo_c`/`mergerepo_c` as configured.
    pub fn from_config(config: Config, events: EventSinkHandle) -> Result<Self> {
        let store_path = config.store_path()?;
        debug!(store = %store_path.display(), "opening local store");
        let store: StoreHandle = Arc::new(LocalStore::open(&store_path)?);
        let tools = Arc::new(Createrepo::from_settings(&config.tools())?);
        Self::new(config, store, tools.clone(), tools, events)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.inner.layout
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.inner.store.as_ref()
    }

    pub fn indexer(&self) -> &dyn IndexTool {
        self.inner.indexer.as_ref()
    }

    pub fn merger(&self) -> &dyn MergeTool {
        self.inner.merger.as_ref()
    }

    pub fn events(&self) -> &dyn EventSink {
        self.inner.events.as_ref()
    }

    pub(crate) fn emit(&self, event: RepoEvent) {
        self.inner.events.emit(event);
    }
}

//! Environment - the process's registry of open files and realms
//!
//! Replaces hidden process-wide state with an explicit object. An
//! environment owns one `SharedFile` (store plus notification coordinator)
//! per path and caches realms per (thread, path, run loop).
//!
//! Files opened with `in_memory` live while any realm on them is alive;
//! other files stay open until `shutdown`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::realm::{Realm, RealmShared};
use crate::config::RealmConfig;
use crate::error::{Error, Result};
use crate::mvcc::VersionedStore;
use crate::notify::{ExecutorId, NotificationCoordinator, RunLoop};
use crate::observability::{log_event, Event, MetricsRegistry, MetricsSnapshot};

/// Store and coordinator shared by every realm on one path.
pub(crate) struct SharedFile {
    config: RealmConfig,
    store: VersionedStore,
    coordinator: Arc<NotificationCoordinator>,
    metrics: Arc<MetricsRegistry>,
}

impl SharedFile {
    fn open(config: &RealmConfig, metrics: &Arc<MetricsRegistry>) -> Arc<Self> {
        let store = VersionedStore::new(
            config.path.clone(),
            config.schema.clone(),
            config.store_config(),
            Arc::clone(metrics),
        );
        let coordinator = Arc::new(NotificationCoordinator::new(
            config.path.clone(),
            Arc::clone(metrics),
        ));
        let observer: Weak<NotificationCoordinator> = Arc::downgrade(&coordinator);
        store.add_commit_observer(observer);

        log_event(
            Event::FileOpen,
            &[
                ("path", &config.path),
                ("in_memory", &config.in_memory.to_string()),
            ],
        );
        Arc::new(Self {
            config: config.clone(),
            store,
            coordinator,
            metrics: Arc::clone(metrics),
        })
    }

    pub(crate) fn store(&self) -> &VersionedStore {
        &self.store
    }

    pub(crate) fn coordinator(&self) -> &Arc<NotificationCoordinator> {
        &self.coordinator
    }

    pub(crate) fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}

enum FileEntry {
    Persistent(Arc<SharedFile>),
    InMemory(Weak<SharedFile>),
}

impl FileEntry {
    fn get(&self) -> Option<Arc<SharedFile>> {
        match self {
            FileEntry::Persistent(file) => Some(Arc::clone(file)),
            FileEntry::InMemory(file) => file.upgrade(),
        }
    }
}

type RealmKey = (ThreadId, String, ExecutorId);

#[derive(Default)]
struct RealmTable {
    cache: HashMap<RealmKey, Weak<RealmShared>>,
    open: Vec<Weak<RealmShared>>,
}

struct EnvironmentInner {
    files: Mutex<HashMap<String, FileEntry>>,
    realms: Mutex<RealmTable>,
    metrics: Arc<MetricsRegistry>,
    closed: AtomicBool,
}

/// Registry of open files and cached realms.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl Environment {
    pub fn new() -> Self {
        log_event(Event::EnvironmentOpen, &[]);
        Self {
            inner: Arc::new(EnvironmentInner {
                files: Mutex::new(HashMap::new()),
                realms: Mutex::new(RealmTable::default()),
                metrics: Arc::new(MetricsRegistry::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Opens a realm bound to the calling thread whose notifications are
    /// delivered on `run_loop`.
    ///
    /// # Errors
    ///
    /// - `EnvironmentClosed` after `shutdown`
    /// - `Config` if the configuration is invalid
    /// - `MismatchedConfig` if the path is already open with an
    ///   incompatible configuration
    pub fn open(&self, config: RealmConfig, run_loop: &RunLoop) -> Result<Realm> {
        if self.is_closed() {
            return Err(Error::EnvironmentClosed);
        }
        config.validate()?;

        let file = self.file(&config)?;
        let key: RealmKey = (thread::current().id(), config.path.clone(), run_loop.id());

        let mut realms = self.inner.realms.lock();
        if config.cache {
            let cached = realms
                .cache
                .get(&key)
                .and_then(Weak::upgrade)
                .filter(|shared| !shared.is_closed());
            if let Some(shared) = cached {
                return Ok(Realm::from_shared(shared));
            }
        }

        let cache = config.cache;
        let path = config.path.clone();
        let realm = Realm::open(file, config, run_loop.handle())?;
        realms.open.retain(|r| r.strong_count() > 0);
        realms.open.push(realm.downgrade());
        if cache {
            realms.cache.retain(|_, r| r.strong_count() > 0);
            realms.cache.insert(key, realm.downgrade());
        }
        drop(realms);

        log_event(Event::RealmOpen, &[("path", &path)]);
        Ok(realm)
    }

    fn file(&self, config: &RealmConfig) -> Result<Arc<SharedFile>> {
        let mut files = self.inner.files.lock();
        if let Some(file) = files.get(&config.path).and_then(FileEntry::get) {
            if let Err(error) = file.config.check_compatible(config) {
                log_event(
                    Event::ConfigMismatch,
                    &[("path", &config.path), ("error", &error.to_string())],
                );
                return Err(error);
            }
            return Ok(file);
        }

        let file = SharedFile::open(config, &self.inner.metrics);
        let entry = if config.in_memory {
            FileEntry::InMemory(Arc::downgrade(&file))
        } else {
            FileEntry::Persistent(Arc::clone(&file))
        };
        files.insert(config.path.clone(), entry);
        Ok(file)
    }

    /// Returns true while a file is open at `path`.
    pub fn is_open(&self, path: &str) -> bool {
        self.inner
            .files
            .lock()
            .get(path)
            .and_then(FileEntry::get)
            .is_some()
    }

    /// Current counters for every file opened through this environment
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes every realm and releases every file. Further opens fail
    /// with `EnvironmentClosed`.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let realms: Vec<Weak<RealmShared>> = {
            let mut table = self.inner.realms.lock();
            table.cache.clear();
            std::mem::take(&mut table.open)
        };
        let mut closed = 0usize;
        for shared in realms.iter().filter_map(Weak::upgrade) {
            shared.close();
            closed += 1;
        }
        let files = std::mem::take(&mut *self.inner.files.lock());
        log_event(
            Event::EnvironmentShutdown,
            &[
                ("realms", &closed.to_string()),
                ("files", &files.len().to_string()),
            ],
        );
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("files", &self.inner.files.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

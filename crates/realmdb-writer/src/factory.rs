//! Namespaced writer handles
//!
//! Identifiers are global to a coordinator. Each handle built by a
//! [`WriterFactory`] prefixes its identifiers with a random namespace, so two
//! owners that both queue work as `"commit"` never replace each other's item.

use crate::coordinator::{WorkResult, WriteCoordinator};
use crate::{Result, WriterError};
use realmdb_index::ReadWriteIndex;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// Separator between a handle's namespace and the caller's identifier.
pub const NAMESPACE_SEPARATOR: char = '/';

/// Builds [`WriterHandle`]s that share one coordinator.
#[derive(Debug, Clone)]
pub struct WriterFactory {
    coordinator: WriteCoordinator,
}

impl WriterFactory {
    /// Create a factory over `coordinator`
    pub fn new(coordinator: WriteCoordinator) -> Self {
        Self { coordinator }
    }

    /// Factory over [`WriteCoordinator::global`]
    pub fn global() -> Self {
        Self::new(WriteCoordinator::global().clone())
    }

    /// Coordinator shared by every handle
    pub const fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    /// A handle with a fresh namespace.
    pub fn build_writer(&self) -> WriterHandle {
        let namespace = Uuid::new_v4().simple().to_string();
        trace!("Built writer handle {}", namespace);
        WriterHandle {
            namespace,
            coordinator: self.coordinator.clone(),
        }
    }
}

/// Queues work on a coordinator under its own identifier namespace.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    namespace: String,
    coordinator: WriteCoordinator,
}

impl WriterHandle {
    /// Namespace prefixed to every identifier
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Coordinator this handle submits to
    pub const fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    /// Identifier as the coordinator sees it.
    pub fn scoped_identifier(&self, identifier: &str) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{identifier}", self.namespace)
    }

    /// Strip this handle's namespace from an identifier seen by an observer.
    ///
    /// Returns `None` for identifiers that belong to other handles.
    pub fn local_identifier<'a>(&self, scoped: &'a str) -> Option<&'a str> {
        scoped
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix(NAMESPACE_SEPARATOR))
    }

    /// Queue `work` under this handle's namespace.
    ///
    /// # Errors
    ///
    /// Fails like [`WriteCoordinator::queue`]; an empty identifier is rejected
    /// before it is scoped.
    pub fn queue<F>(&self, identifier: &str, work: F) -> Result<()>
    where
        F: FnOnce() -> WorkResult + Send + 'static,
    {
        if identifier.is_empty() {
            return Err(WriterError::InvalidArgument(
                "identifier must not be empty".to_string(),
            ));
        }
        self.coordinator
            .queue(self.scoped_identifier(identifier), work)
    }

    /// Cancel a pending item queued through this handle.
    pub fn cancel(&self, identifier: &str) -> bool {
        self.coordinator.cancel(&self.scoped_identifier(identifier))
    }

    /// Queue a commit of `index` that is skipped if nothing changed by the
    /// time it runs.
    pub fn queue_commit(&self, identifier: &str, index: Arc<ReadWriteIndex>) -> Result<()> {
        self.queue(identifier, move || {
            if index.has_uncommitted_changes() {
                index.commit()?;
            } else {
                trace!("Index {} has no changes, skipping commit", index.path().display());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{WriteEvent, WriterConfig};
    use crossbeam_channel::Receiver;
    use parking_lot::Mutex;
    use realmdb_index::{IndexOptions, ReadOnlyIndex};
    use std::time::Duration;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn factory() -> (WriterFactory, Receiver<WriteEvent>) {
        let coordinator = WriteCoordinator::new(
            WriterConfig::new().with_idle_timeout(Duration::from_millis(200)),
        )
        .expect("valid config");
        let (tx, rx) = crossbeam_channel::unbounded();
        coordinator.add_observer(move |event: &WriteEvent| {
            let _ = tx.send(event.clone());
        });
        (WriterFactory::new(coordinator), rx)
    }

    fn wait_drained(rx: &Receiver<WriteEvent>) -> Vec<WriteEvent> {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv_timeout(WAIT).expect("event before timeout");
            let drained = event == WriteEvent::QueueDrained;
            seen.push(event);
            if drained {
                return seen;
            }
        }
    }

    #[test]
    fn test_handles_do_not_collide() {
        let (factory, rx) = factory();
        let first = factory.build_writer();
        let second = factory.build_writer();
        assert_ne!(first.namespace(), second.namespace());

        let ran = Arc::new(Mutex::new(Vec::new()));
        for (label, handle) in [("first", &first), ("second", &second)] {
            let ran = Arc::clone(&ran);
            handle
                .queue("commit", move || {
                    ran.lock().push(label);
                    Ok(())
                })
                .expect("queue");
        }
        assert_eq!(factory.coordinator().pending(), 2);

        let seen = wait_drained(&rx);
        let mut ran = ran.lock().clone();
        ran.sort_unstable();
        assert_eq!(ran, vec!["first", "second"]);

        let local: Vec<&str> = seen
            .iter()
            .filter_map(WriteEvent::identifier)
            .filter_map(|id| first.local_identifier(id))
            .collect();
        assert_eq!(local, vec!["commit"]);

        factory.coordinator().shutdown(true);
    }

    #[test]
    fn test_cancel_is_scoped() {
        let (factory, _rx) = factory();
        let first = factory.build_writer();
        let second = factory.build_writer();

        first.queue("acre", || Ok(())).expect("queue");
        assert!(!second.cancel("acre"));
        assert!(first.cancel("acre"));
        assert!(!first.cancel("acre"));

        factory.coordinator().shutdown(true);
    }

    #[test]
    fn test_local_identifier() {
        let (factory, _rx) = factory();
        let handle = factory.build_writer();
        let scoped = handle.scoped_identifier("zone/7");

        assert_eq!(handle.local_identifier(&scoped), Some("zone/7"));
        assert_eq!(handle.local_identifier("someone-else/zone/7"), None);
        assert_eq!(handle.local_identifier(handle.namespace()), None);
        assert!(handle.queue("", || Ok(())).is_err());
    }

    #[test]
    fn test_queue_commit_writes_dirty_index() {
        let dir = TempDir::new().expect("temp dir");
        let options = IndexOptions::new(dir.path(), "Acre");
        let index = Arc::new(ReadWriteIndex::open(&options).expect("open"));
        index.add(3, 300, 30).expect("add");
        index.add(1, 100, 10).expect("add");

        let (factory, rx) = factory();
        let writer = factory.build_writer();
        writer.queue_commit("acre", Arc::clone(&index)).expect("queue");

        let seen = wait_drained(&rx);
        assert!(seen.contains(&WriteEvent::Completed {
            identifier: writer.scoped_identifier("acre"),
            succeeded: true,
        }));
        assert!(!index.has_uncommitted_changes());

        let reader = ReadOnlyIndex::open(options.path(), options.banner()).expect("read");
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get(3).expect("lookup").expect("present").offset(), 300);

        factory.coordinator().shutdown(true);
    }

    #[test]
    fn test_queue_commit_skips_clean_index() {
        let dir = TempDir::new().expect("temp dir");
        let options = IndexOptions::new(dir.path(), "Zone");
        let index = Arc::new(ReadWriteIndex::open(&options).expect("open"));
        let before = std::fs::metadata(options.path())
            .expect("metadata")
            .modified()
            .expect("mtime");

        let (factory, rx) = factory();
        let writer = factory.build_writer();
        writer.queue_commit("zone", Arc::clone(&index)).expect("queue");
        wait_drained(&rx);

        let after = std::fs::metadata(options.path())
            .expect("metadata")
            .modified()
            .expect("mtime");
        assert_eq!(before, after);

        factory.coordinator().shutdown(true);
    }
}

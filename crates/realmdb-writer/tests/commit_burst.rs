//! Bursts of commits against several indexes through one coordinator

#![allow(clippy::unwrap_used, clippy::expect_used)]

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use realmdb_index::{IndexOptions, ReadOnlyIndex, ReadWriteIndex};
use realmdb_writer::{CoordinatorState, WriteCoordinator, WriteEvent, WriterConfig, WriterFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn burst_of_commits_collapses_per_index() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = WriteCoordinator::new(
        WriterConfig::new()
            .with_idle_timeout(Duration::from_millis(300))
            .with_thread_name("burst-writer"),
    )
    .expect("valid config");

    let completions: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
    {
        let completions = Arc::clone(&completions);
        coordinator.add_observer(move |event: &WriteEvent| {
            if let WriteEvent::Completed { identifier, .. } = event {
                *completions.lock().entry(identifier.clone()).or_default() += 1;
            }
        });
    }

    let factory = WriterFactory::new(coordinator.clone());
    let writer = factory.build_writer();

    let names = ["Acre", "Zone", "Sector"];
    let indexes: Vec<(IndexOptions, Arc<ReadWriteIndex>)> = names
        .iter()
        .map(|name| {
            let options = IndexOptions::new(dir.path().join("db"), *name);
            let index = Arc::new(ReadWriteIndex::open(&options).expect("open"));
            (options, index)
        })
        .collect();

    // Every mutation is followed by a commit request; all requests for one
    // index land inside the worker's first park and collapse into one run.
    for key in 0..20 {
        for (options, index) in &indexes {
            index.add(key, i64::from(key) * 64, 64).expect("add");
            writer
                .queue_commit(&options.name, Arc::clone(index))
                .expect("queue commit");
        }
    }
    assert_eq!(coordinator.pending(), names.len());

    coordinator.shutdown(false);
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);

    for (options, index) in &indexes {
        assert!(!index.has_uncommitted_changes());
        let reader = ReadOnlyIndex::open(options.path(), options.banner()).expect("read");
        assert_eq!(reader.len(), 20);
        assert_eq!(
            reader.get(19).expect("lookup").map(|l| l.offset()),
            Some(19 * 64)
        );
    }

    // The notifier has exited, so every completion has been delivered
    let completions = completions.lock();
    assert_eq!(completions.len(), names.len());
    for name in names {
        assert_eq!(completions.get(&writer.scoped_identifier(name)), Some(&1));
    }
}

#[test]
fn failed_commit_is_reported_and_retried() {
    let dir = TempDir::new().expect("temp dir");
    let coordinator = WriteCoordinator::new(
        WriterConfig::new().with_idle_timeout(Duration::from_millis(20)),
    )
    .expect("valid config");
    let failures = Arc::new(Mutex::new(Vec::new()));
    {
        let failures = Arc::clone(&failures);
        coordinator.set_failure_handler(move |failure| {
            failures.lock().push(failure.to_string());
        });
    }

    let options = IndexOptions::new(dir.path().join("gone"), "Acre")
        .with_commit_mode(realmdb_index::CommitMode::AtomicReplace);
    let index = Arc::new(ReadWriteIndex::open(&options).expect("open"));
    index.add(1, 1, 1).expect("add");
    std::fs::remove_dir_all(&options.directory).expect("remove dir");

    let writer = WriterFactory::new(coordinator.clone()).build_writer();
    writer.queue_commit("acre", Arc::clone(&index)).expect("queue");
    coordinator.shutdown(false);

    assert_eq!(failures.lock().len(), 1);
    assert!(failures.lock()[0].contains("Commit to"));
    assert!(index.has_uncommitted_changes());

    std::fs::create_dir_all(&options.directory).expect("recreate dir");
    writer.queue_commit("acre", Arc::clone(&index)).expect("queue again");
    coordinator.shutdown(false);
    assert!(!index.has_uncommitted_changes());
    assert_eq!(failures.lock().len(), 1);

    coordinator.stop(true);
    assert_eq!(coordinator.state(), CoordinatorState::Done);
}

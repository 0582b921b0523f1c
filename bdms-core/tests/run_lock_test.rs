//! Concurrent migration runs against one database file
//!
//! Runs serialize on the run lock, so every migration is applied exactly
//! once no matter how many runners start together.
//!
//! Run with: cargo test --test run_lock_test -- --nocapture

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use bdms_core::config::Config;
use bdms_core::services::RunLock;
use bdms_core::{Error, MigrationContext};

const RUNNER_COUNT: usize = 4;

fn file_config(dir: &Path) -> Config {
    let db_path = dir.join("boreholes.duckdb");
    Config::load(dir)
        .unwrap()
        .with_connection(Some(db_path.to_string_lossy().into_owned()))
        .unwrap()
}

#[test]
fn test_concurrent_runners_apply_each_migration_once() {
    let temp_dir = TempDir::new().unwrap();
    let dir = Arc::new(temp_dir.path().to_path_buf());
    let barrier = Arc::new(Barrier::new(RUNNER_COUNT));

    let handles: Vec<_> = (0..RUNNER_COUNT)
        .map(|i| {
            let dir = Arc::clone(&dir);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let ctx = MigrationContext::open_locked(file_config(&dir), &dir)
                    .map_err(|e| format!("runner {}: {}", i, e))?;
                let result = ctx
                    .migrations()
                    .run_pending()
                    .map_err(|e| format!("runner {}: {}", i, e))?;
                Ok::<_, String>(result.applied_count())
            })
        })
        .collect();

    let mut total_applied = 0;
    for handle in handles {
        total_applied += handle.join().unwrap().unwrap();
    }

    let ctx = MigrationContext::open(file_config(&dir), &dir).unwrap();
    assert_eq!(total_applied, ctx.catalog.len());
    assert_eq!(ctx.migrations().get_applied().unwrap().len(), ctx.catalog.len());
}

#[test]
fn test_held_lock_times_out_a_second_runner() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = file_config(temp_dir.path());
    config.lock_timeout = Duration::from_millis(200);

    let db_path = config.db_path().unwrap();
    let _held = RunLock::acquire(&db_path, Duration::from_millis(100)).unwrap();

    let err = MigrationContext::open_locked(config.clone(), temp_dir.path())
        .err()
        .expect("lock is held");
    assert!(matches!(err, Error::Locked(_)));

    // Read-only commands don't take the lock
    assert!(MigrationContext::open(config, temp_dir.path()).is_ok());
}

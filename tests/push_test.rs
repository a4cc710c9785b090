//! # Push Tests
//!
//! End-to-end push scenarios against an in-memory remote.
//!
//! ## Test Coverage
//!
//! - First push of a new environment
//! - No-op pushes when nothing changed locally
//! - Cloud-ahead conflicts
//! - Key id renegotiation after a rejected upload
//! - Name validation and the default environment
//! - A locked cache aborting the run
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test push_test
//! ```

mod common;

use common::{hold_cache_lock, open, sealed, test_key, FakeRemote, Workspace, APP, PROJECT};
use hx_env::envfile::{content_hash, EnvName};
use hx_env::error::{CacheError, HxError, SyncError};
use hx_env::sync::{
    EnvOutcome, PullOptions, PullSelection, PushSelection, SkipReason, Synchroniser,
};
use std::time::Duration;

fn single(name: &str) -> PushSelection {
    PushSelection::Single(name.to_string())
}

#[test]
fn test_first_push_of_new_env() {
    let remote = FakeRemote::new(&["staging"]);
    let key = test_key(42, 'a');
    remote.set_key(&key);
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\nBAZ=qux\n");

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(summary.is_success());
    assert!(matches!(
        summary.get("staging"),
        Some(EnvOutcome::Synced { version: 1 })
    ));

    let puts = remote.puts();
    assert_eq!(puts.len(), 1);
    let put = &puts[0];
    assert_eq!(put.app, APP);
    assert_eq!(put.env, Workspace::named("staging"));
    assert_eq!(put.secret_key_id, 42);
    assert_eq!(put.payload.version, Some(1));
    assert_eq!(put.payload.count_variables, 2);
    assert_eq!(put.payload.size, "14 bytes");
    assert_eq!(put.payload.secret_key_id, Some(42));
    assert_eq!(open(&put.payload, &key), "FOO=bar\nBAZ=qux\n");

    let entry = ws
        .cache
        .get(PROJECT, APP, &Workspace::named("staging"))
        .unwrap()
        .expect("cache entry written");
    assert_eq!(entry.version, 1);
    assert_eq!(entry.hash, content_hash("FOO=bar\nBAZ=qux\n"));
}

#[test]
fn test_push_without_changes_is_noop() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\nBAZ=qux\n");

    ws.sync().push(&ws.target(), &single("staging")).unwrap();
    remote.clear_puts();

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(remote.puts().is_empty());
    assert!(matches!(
        summary.get("staging"),
        Some(EnvOutcome::Skipped(SkipReason::NoLocalChange))
    ));
    assert!(summary.is_success());
}

#[test]
fn test_push_second_version() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\n");
    ws.sync().push(&ws.target(), &single("staging")).unwrap();

    ws.write_env("staging", "FOO=baz\n");
    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(matches!(
        summary.get("staging"),
        Some(EnvOutcome::Synced { version: 2 })
    ));
    let latest = remote
        .latest(APP, &Workspace::named("staging"))
        .expect("stored payload");
    assert_eq!(latest.version, Some(2));
}

#[test]
fn test_push_rejected_when_cloud_ahead() {
    let remote = FakeRemote::new(&["staging"]);
    let key = test_key(42, 'a');
    remote.set_key(&key);
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\n");
    ws.sync().push(&ws.target(), &single("staging")).unwrap();

    // Another client pushes version 2
    remote.store(APP, &Workspace::named("staging"), sealed("FOO=other\n", &key, 2));
    remote.clear_puts();

    ws.write_env("staging", "FOO=mine\n");
    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(remote.puts().is_empty());
    match summary.get("staging") {
        Some(EnvOutcome::Failed(SyncError::CloudAhead {
            name,
            cloud_version,
            local_version,
        })) => {
            assert_eq!(name, "staging");
            assert_eq!(*cloud_version, 2);
            assert_eq!(*local_version, 1);
        }
        other => panic!("expected CloudAhead, got {other:?}"),
    }
    assert!(!summary.is_success());
}

#[test]
fn test_push_without_cache_when_cloud_has_payload() {
    let remote = FakeRemote::new(&["staging"]);
    let key = test_key(42, 'a');
    remote.set_key(&key);
    remote.store(APP, &Workspace::named("staging"), sealed("FOO=cloud\n", &key, 1));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=local\n");

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(matches!(
        summary.get("staging"),
        Some(EnvOutcome::Failed(SyncError::CloudAhead {
            cloud_version: 1,
            local_version: 0,
            ..
        }))
    ));
    assert!(remote.puts().is_empty());
}

#[test]
fn test_put_conflict_reported_as_cloud_ahead() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\n");
    remote.conflict_once(APP, "staging");

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(matches!(
        summary.get("staging"),
        Some(EnvOutcome::Failed(SyncError::CloudAhead { .. }))
    ));
    assert!(ws
        .cache
        .get(PROJECT, APP, &Workspace::named("staging"))
        .unwrap()
        .is_none());
}

#[test]
fn test_key_id_renegotiation_retries_same_ciphertext() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(0, 'a'));
    remote.key_mismatch_once(&test_key(17, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\n");

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(summary.is_success());
    let puts = remote.puts();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[0].secret_key_id, 0);
    assert_eq!(puts[1].secret_key_id, 17);
    assert_eq!(puts[1].payload.secret_key_id, Some(17));
    assert_eq!(puts[0].payload.data, puts[1].payload.data);
}

#[test]
fn test_key_id_renegotiation_reencrypts_when_material_changes() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(0, 'a'));
    let refreshed = test_key(17, 'b');
    remote.key_mismatch_once(&refreshed);
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\n");

    ws.sync().push(&ws.target(), &single("staging")).unwrap();

    let puts = remote.puts();
    assert_eq!(puts.len(), 2);
    assert_ne!(puts[0].payload.data, puts[1].payload.data);
    assert_eq!(open(&puts[1].payload, &refreshed), "FOO=bar\n");
}

#[test]
fn test_push_keeps_key_of_existing_payload() {
    let remote = FakeRemote::new(&["staging"]);
    let old = test_key(5, 'b');
    let current = test_key(6, 'c');
    remote.add_old_key(&old);
    remote.set_key(&current);
    remote.store(APP, &Workspace::named("staging"), sealed("FOO=1\n", &old, 1));
    let ws = Workspace::new(remote.clone());

    ws.sync()
        .pull(
            &ws.target(),
            &PullSelection::Single("staging".into()),
            PullOptions::default(),
        )
        .unwrap();
    ws.write_env("staging", "FOO=2\n");
    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(summary.is_success());
    let puts = remote.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].secret_key_id, 5);
    assert_eq!(open(&puts[0].payload, &old), "FOO=2\n");
}

#[test]
fn test_push_unknown_environment() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("qa", "FOO=bar\n");

    let summary = ws.sync().push(&ws.target(), &single("qa")).unwrap();

    assert!(matches!(
        summary.get("qa"),
        Some(EnvOutcome::Failed(SyncError::UnknownEnvironment { .. }))
    ));
    assert!(remote.puts().is_empty());
}

#[test]
fn test_push_default_environment_unsupported() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("default", "FOO=bar\n");

    let summary = ws.sync().push(&ws.target(), &single("default")).unwrap();

    assert!(matches!(
        summary.get("default"),
        Some(EnvOutcome::Failed(SyncError::DefaultUnsupported))
    ));
    let summary = ws
        .sync()
        .push(&ws.target(), &PushSelection::DefaultOnly)
        .unwrap();
    assert_eq!(summary.failed(), 1);
    assert!(remote.puts().is_empty());
}

#[test]
fn test_push_invalid_name_suggests_fix() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());

    let summary = ws.sync().push(&ws.target(), &single("-staging_")).unwrap();

    match summary.get("-staging_") {
        Some(EnvOutcome::Failed(SyncError::InvalidName(e))) => {
            assert_eq!(e.suggestion, "staging");
        }
        other => panic!("expected InvalidName, got {other:?}"),
    }
    assert!(remote.puts().is_empty());
}

#[test]
fn test_push_empty_file() {
    let remote = FakeRemote::new(&["staging"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "");

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(summary.is_success());
    let puts = remote.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].payload.count_variables, 0);
    assert_eq!(puts[0].payload.size, "0 bytes");
}

#[test]
fn test_push_all_local_files_in_order() {
    let remote = FakeRemote::new(&["dev", "staging", "production"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "A=1\n");
    ws.write_env("dev", "A=2\n");
    ws.write_env("default", "A=3\n");
    std::fs::write(ws.dir.path().join(".env.local"), "SECRET=1\n").unwrap();

    let summary = ws.sync().push(&ws.target(), &PushSelection::AllLocal).unwrap();

    assert!(summary.is_success());
    let pushed: Vec<EnvName> = remote.puts().into_iter().map(|p| p.env).collect();
    assert_eq!(
        pushed,
        [Workspace::named("dev"), Workspace::named("staging")]
    );
    assert!(summary.get("default").is_none());
}

#[test]
fn test_push_all_reports_invalid_file_names() {
    let remote = FakeRemote::new(&["dev"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("dev", "A=1\n");
    std::fs::write(ws.dir.path().join(".env.Bad Name"), "A=2\n").unwrap();

    let summary = ws.sync().push(&ws.target(), &PushSelection::AllLocal).unwrap();

    assert_eq!(summary.synced(), 1);
    assert_eq!(summary.failed(), 1);
    assert!(matches!(
        summary.get(".env.Bad Name"),
        Some(EnvOutcome::Failed(SyncError::InvalidName(_)))
    ));
}

#[test]
fn test_push_mints_key_when_none_exists() {
    let remote = FakeRemote::new(&["staging"]);
    let ws = Workspace::new(remote.clone());
    ws.write_env("staging", "FOO=bar\n");

    let summary = ws.sync().push(&ws.target(), &single("staging")).unwrap();

    assert!(summary.is_success());
    let minted = remote.current_key().expect("key published to the key service");
    let puts = remote.puts();
    assert_eq!(puts[0].secret_key_id, minted.key_id());
    assert_eq!(open(&puts[0].payload, &minted), "FOO=bar\n");
}

#[test]
fn test_push_aborts_when_cache_is_locked() {
    let remote = FakeRemote::new(&["dev", "prod"]);
    remote.set_key(&test_key(42, 'a'));
    let ws = Workspace::new(remote.clone());
    ws.write_env("dev", "A=1\n");
    ws.write_env("prod", "B=1\n");

    let cache = ws.cache.clone().with_lock_timeout(Duration::from_millis(100));
    let _lock = hold_cache_lock(&cache);
    let sync = Synchroniser::new(&*remote, &ws.keys, &cache);

    let err = sync
        .push(&ws.target(), &PushSelection::AllLocal)
        .unwrap_err();

    assert!(
        matches!(err, HxError::Sync(SyncError::Cache(CacheError::Locked { .. }))),
        "expected a locked cache, got {err:?}"
    );
    // dev reached the remote before its cache write failed; prod was never tried
    let pushed: Vec<String> = remote
        .puts()
        .iter()
        .map(|p| p.env.as_str().to_string())
        .collect();
    assert_eq!(pushed, ["dev"]);
}

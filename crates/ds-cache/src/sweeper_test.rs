use super::*;
use crate::store::StorePolicy;
use ds_core::layout::{RootLayout, CACHE_SUBDIRS};
use std::path::Path;
use std::time::Duration;

fn make_store(dir: &Path) -> Arc<ArtifactStore> {
    std::fs::write(dir.join("config.toml"), "name = 'demo'\n").unwrap();
    for name in ["reports", "composites"] {
        std::fs::create_dir_all(dir.join(name)).unwrap();
    }
    for name in CACHE_SUBDIRS {
        std::fs::create_dir_all(dir.join("cache").join(name)).unwrap();
    }
    let layout = RootLayout::validate(dir).unwrap();
    ArtifactStore::new(
        layout,
        StorePolicy {
            default_ttl: Duration::from_secs(300),
            soft_timeout: Duration::from_secs(30),
            hard_timeout: Duration::from_secs(300),
            stale_while_revalidate: false,
        },
    )
}

fn seed_artifact(store: &Arc<ArtifactStore>, kind: ArtifactKind, name: &str, bytes: usize) -> PathBuf {
    let path = store
        .layout()
        .cache_dir(kind.dir_name())
        .join(format!("{name}.parquet"));
    std::fs::write(&path, vec![0u8; bytes]).unwrap();
    path
}

#[test]
fn test_eviction_respects_byte_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = make_store(dir.path());

    for i in 0..4 {
        let path = seed_artifact(&store, ArtifactKind::Base, &format!("a{i}"), 1000);
        // age the files distinctly through the access map
        store.forget(&path);
        std::thread::sleep(Duration::from_millis(5));
    }

    sweep_once(
        &store,
        &SweepLimits {
            max_kind_bytes: 2500,
            max_total_bytes: u64::MAX,
        },
    );

    let remaining: Vec<_> = std::fs::read_dir(store.layout().cache_dir("artifacts"))
        .unwrap()
        .flatten()
        .map(|e| e.file_name().into_string().unwrap())
        .collect();
    assert_eq!(remaining.len(), 2, "two files fit under 2500 bytes");
    // oldest files evicted first
    assert!(remaining.contains(&"a2.parquet".to_string()));
    assert!(remaining.contains(&"a3.parquet".to_string()));
}

#[test]
fn test_in_flight_files_survive_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let store = make_store(dir.path());

    let pinned_fp = ds_core::fingerprint::Fingerprint::of_bytes(b"pinned");
    let handle = store
        .get_or_build(
            ArtifactKind::Base,
            pinned_fp,
            Duration::from_secs(300),
            false,
            "base",
            |tmp| {
                std::fs::write(tmp, vec![0u8; 4000]).unwrap();
                Ok(())
            },
        )
        .unwrap();

    sweep_once(
        &store,
        &SweepLimits {
            max_kind_bytes: 1,
            max_total_bytes: 1,
        },
    );

    assert!(handle.path().is_file(), "ref-counted artifact is never evicted");

    drop(handle);
    sweep_once(
        &store,
        &SweepLimits {
            max_kind_bytes: 1,
            max_total_bytes: 1,
        },
    );
    assert!(
        !store.path_for(ArtifactKind::Base, pinned_fp).exists(),
        "released artifact is evictable"
    );
}

#[test]
fn test_global_cap_spans_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let store = make_store(dir.path());

    seed_artifact(&store, ArtifactKind::Base, "a", 1000);
    std::thread::sleep(Duration::from_millis(5));
    seed_artifact(&store, ArtifactKind::Materialize, "b", 1000);

    sweep_once(
        &store,
        &SweepLimits {
            max_kind_bytes: u64::MAX,
            max_total_bytes: 1500,
        },
    );

    let base_left = std::fs::read_dir(store.layout().cache_dir("artifacts"))
        .unwrap()
        .count();
    let mat_left = std::fs::read_dir(store.layout().cache_dir("materialize"))
        .unwrap()
        .count();
    assert_eq!(base_left + mat_left, 1, "one survivor under the global cap");
}

#[test]
fn test_non_parquet_files_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = make_store(dir.path());

    let marker = store.layout().cache_dir("artifacts").join("README.txt");
    std::fs::write(&marker, b"not an artifact").unwrap();

    sweep_once(
        &store,
        &SweepLimits {
            max_kind_bytes: 1,
            max_total_bytes: 1,
        },
    );
    assert!(marker.is_file());
}

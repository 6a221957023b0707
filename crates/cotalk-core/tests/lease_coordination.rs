//! Concurrent pickers and lease reclamation against the file store.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{annotator, app, config, images, noon, task_id, ScriptedCollaborators};
use cotalk_core::app::App;
use cotalk_core::domain::{Assignment, LeaseStatus};
use cotalk_core::impls::FileTaskStore;
use cotalk_core::ports::{Clock, FixedClock, TaskStore};

struct Pool {
    _dir: tempfile::TempDir,
    store: Arc<FileTaskStore>,
    clock: Arc<FixedClock>,
    app: Arc<App>,
}

async fn pool(names: &[&str]) -> Pool {
    let dir = tempfile::tempdir().unwrap();
    let image_dir = dir.path().join("image");
    let task_dir = dir.path().join("tasks");
    std::fs::create_dir(&image_dir).unwrap();
    images(&image_dir, names);

    let store = Arc::new(FileTaskStore::open(&task_dir).await.unwrap());
    let clock = Arc::new(FixedClock::new(noon()));
    let app = app(
        config(&image_dir, &task_dir, 2),
        store.clone(),
        clock.clone(),
        Arc::new(ScriptedCollaborators::default()),
    );
    app.init_pool().await.unwrap();
    Pool {
        _dir: dir,
        store,
        clock,
        app: Arc::new(app),
    }
}

async fn race(app: &Arc<App>, pickers: usize) -> Vec<Assignment> {
    let handles: Vec<_> = (0..pickers)
        .map(|i| {
            let app = Arc::clone(app);
            tokio::spawn(async move { app.pick(&annotator(&format!("annotator-{i}"))).await })
        })
        .collect();

    let mut assignments = Vec::with_capacity(pickers);
    for handle in handles {
        assignments.push(handle.await.unwrap().unwrap());
    }
    assignments
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_task_goes_to_exactly_one_of_many_pickers() {
    let pool = pool(&["only.png"]).await;

    let assignments = race(&pool.app, 16).await;

    let winners = assignments.iter().filter(|a| a.task().is_some()).count();
    assert_eq!(winners, 1);
    let stored = pool.store.get(&task_id("only")).await.unwrap();
    assert_eq!(stored.status, LeaseStatus::Locked);
    assert_eq!(stored.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pickers_never_share_a_task() {
    let names: Vec<String> = (0..8).map(|i| format!("img{i}.png")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let pool = pool(&names).await;

    let assignments = race(&pool.app, 12).await;

    let leased: Vec<_> = assignments
        .iter()
        .filter_map(|a| a.task().map(|t| t.task_id.clone()))
        .collect();
    let distinct: HashSet<_> = leased.iter().cloned().collect();
    assert_eq!(leased.len(), 8);
    assert_eq!(distinct.len(), 8);
    assert_eq!(pool.app.status().await.unwrap().locked, 8);
}

#[tokio::test]
async fn abandoned_lease_is_reclaimed_and_offered_again() {
    let pool = pool(&["a.png"]).await;
    let first = pool.app.pick(&annotator("alice")).await.unwrap();
    assert!(first.task().is_some());
    assert_eq!(
        pool.app.pick(&annotator("bob")).await.unwrap(),
        Assignment::NoTaskAvailable
    );

    // default timeout is 15 minutes; reclaim only strictly after it
    pool.clock.advance(chrono::Duration::minutes(15));
    assert_eq!(pool.app.sweep().await.unwrap(), 0);
    pool.clock.advance(chrono::Duration::seconds(1));
    assert_eq!(pool.app.sweep().await.unwrap(), 1);

    let second = pool.app.pick(&annotator("bob")).await.unwrap();
    assert_eq!(second.task().unwrap().task_id, task_id("a"));
    let stored = pool.store.get(&task_id("a")).await.unwrap();
    assert_eq!(stored.lease_time, Some(pool.clock.now()));
}

#[tokio::test]
async fn reaper_loop_runs_in_the_background() {
    let pool = pool(&["a.png"]).await;
    pool.app.pick(&annotator("alice")).await.unwrap();
    pool.clock.advance(chrono::Duration::hours(1));

    let reaper = pool.app.spawn_reaper();
    let reclaimed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pool.store.get(&task_id("a")).await.unwrap().is_released() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    reaper.shutdown_and_join().await;

    assert!(reclaimed.is_ok(), "lease was never reclaimed");
}

#[tokio::test]
async fn refresh_naming_a_task_releases_whoever_holds_it() {
    let pool = pool(&["a.png"]).await;
    let a = task_id("a");

    let alice = pool.app.refresh(None, &annotator("alice")).await.unwrap();
    assert_eq!(alice.task().unwrap().task_id, a);

    // bob names alice's task: the lease is released unconditionally and re-picked
    let bob = pool.app.refresh(Some(&a), &annotator("bob")).await.unwrap();
    assert_eq!(bob.task().unwrap().task_id, a);

    let stored = pool.store.get(&a).await.unwrap();
    assert_eq!(stored.status, LeaseStatus::Locked);
    assert_eq!(stored.version, 3);
}

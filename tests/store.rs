mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::{captured, close_to, failed, host, open_store};

#[test]
fn root_execution_has_null_pointers() {
    let ts = open_store();
    let id = ts
        .store
        .insert_execution("/w", &captured("hello"), &host(), None)
        .unwrap();

    let (parent, root): (Option<i64>, Option<i64>) = ts
        .raw()
        .query_row(
            "SELECT parent_execution_id, root_execution_id
             FROM program_executions WHERE execution_id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(parent, None);
    assert_eq!(root, None);
}

#[test]
fn derivation_chain_reaches_its_root_in_one_hop() {
    let ts = open_store();
    let h = host();
    let w = ts
        .store
        .insert_execution("/w", &captured("hello"), &h, None)
        .unwrap();
    let a = ts
        .store
        .insert_execution("/w/a", &captured("5\n"), &h, Some(w))
        .unwrap();
    let b = ts
        .store
        .insert_execution("/w/a/b", &captured("5"), &h, Some(a))
        .unwrap();

    let root_of = |id: i64| -> Option<i64> {
        ts.raw()
            .query_row(
                "SELECT root_execution_id FROM program_executions WHERE execution_id = ?1",
                [id],
                |row| row.get(0),
            )
            .unwrap()
    };

    // The direct child's root is the watch itself; the grandchild inherits
    // the same root rather than pointing at its parent.
    assert_eq!(root_of(a), Some(w));
    assert_eq!(root_of(b), Some(w));
}

#[test]
fn executions_round_trip_byte_for_byte() {
    let ts = open_store();
    let mut result = captured("line one\nline två \u{1F600}\n");
    result.stderr = "warn: trailing spaces   \n\t".to_string();
    let id = ts
        .store
        .insert_execution("/w", &result, &host(), None)
        .unwrap();

    let read = || -> (String, String, bool) {
        ts.raw()
            .query_row(
                "SELECT stdout, stderr, success FROM program_executions WHERE execution_id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap()
    };

    let first = read();
    assert_eq!(first.0, result.stdout);
    assert_eq!(first.1, result.stderr);
    assert!(first.2);
    // Nothing in the store ever mutates a written record.
    assert_eq!(read(), first);
}

#[test]
fn childless_query_skips_failures_and_derived_parents() {
    let ts = open_store();
    let h = host();

    let p1 = ts
        .store
        .insert_execution("/w", &captured("one"), &h, None)
        .unwrap();
    ts.store
        .insert_execution("/w", &failed("broken"), &h, None)
        .unwrap();
    let p3 = ts
        .store
        .insert_execution("/w", &captured("three"), &h, None)
        .unwrap();
    // p1 already has a child at /w/a, but not at /w/b.
    ts.store
        .insert_execution("/w/a", &captured("derived"), &h, Some(p1))
        .unwrap();

    let (items, more) = ts.store.get_childless_executions("/w", "/w/a").unwrap();
    assert!(!more);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, p3);
    assert_eq!(items[0].stdout, "three");

    let (items, _) = ts.store.get_childless_executions("/w", "/w/b").unwrap();
    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![p1, p3], "oldest first");
}

#[test]
fn childless_query_reports_a_full_batch() {
    let ts = open_store();
    let h = host();
    for i in 0..101 {
        ts.store
            .insert_execution("/w", &captured(&format!("{i}")), &h, None)
            .unwrap();
    }

    let (items, more) = ts.store.get_childless_executions("/w", "/w/a").unwrap();
    assert_eq!(items.len(), 100);
    assert!(more, "a full batch means more work is pending");
}

#[test]
fn latest_if_childless_only_sees_the_newest_success() {
    let ts = open_store();
    let h = host();

    assert!(ts
        .store
        .get_latest_execution_if_childless("/w/a", "/w/a/t")
        .unwrap()
        .is_none());

    let old = ts
        .store
        .insert_execution("/w/a", &captured("old"), &h, None)
        .unwrap();
    let newest = ts
        .store
        .insert_execution("/w/a", &captured("new"), &h, None)
        .unwrap();
    // A failed run after the newest success is never eligible itself.
    ts.store
        .insert_execution("/w/a", &failed("nope"), &h, None)
        .unwrap();

    let item = ts
        .store
        .get_latest_execution_if_childless("/w/a", "/w/a/t")
        .unwrap()
        .expect("newest success is childless");
    assert_eq!(item.id, newest);
    assert_eq!(item.stdout, "new");

    // Once the newest has a child, nothing is returned: the older childless
    // execution must not fire anything.
    ts.store
        .insert_execution("/w/a/t", &captured(""), &h, Some(newest))
        .unwrap();
    assert!(ts
        .store
        .get_latest_execution_if_childless("/w/a", "/w/a/t")
        .unwrap()
        .is_none());
    let _ = old;
}

#[test]
fn time_of_latest_successful_execution_ignores_failures() {
    let ts = open_store();
    let h = host();

    assert!(ts
        .store
        .time_of_latest_successful_execution("/w/a/t")
        .unwrap()
        .is_none());

    let ok = captured("fired");
    ts.store.insert_execution("/w/a/t", &ok, &h, None).unwrap();
    ts.store
        .insert_execution("/w/a/t", &failed("later failure"), &h, None)
        .unwrap();

    let t = ts
        .store
        .time_of_latest_successful_execution("/w/a/t")
        .unwrap()
        .expect("one success recorded");
    assert!(close_to(t, ok.started_at));
}

#[test]
fn scheduling_is_idempotent_per_path() {
    let ts = open_store();
    let t1 = SystemTime::now() + Duration::from_secs(10);
    let t2 = SystemTime::now() + Duration::from_secs(99);

    ts.store.schedule_event("/w", t1).unwrap();
    ts.store.schedule_event("/w", t2).unwrap(); // silent no-op

    let rows: i64 = ts
        .raw()
        .query_row("SELECT COUNT(*) FROM scheduling_queue", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);

    let next = ts.store.next_scheduled_event("/w").unwrap().unwrap();
    assert!(close_to(next, t1));

    ts.store.unschedule("/w").unwrap();
    assert!(ts.store.next_scheduled_event("/w").unwrap().is_none());
}

#[test]
fn leases_are_exclusive_until_released() {
    let ts = open_store();
    let other = ts.reopen();
    let deadline = SystemTime::now() + Duration::from_secs(30);

    let lease = ts
        .store
        .try_obtain_lease("execute:/w", deadline)
        .unwrap()
        .expect("first acquisition");
    assert!(other
        .try_obtain_lease("execute:/w", deadline)
        .unwrap()
        .is_none());
    // A different key is unrelated.
    assert!(other
        .try_obtain_lease("execute:/x", deadline)
        .unwrap()
        .is_some());

    ts.store.release_lease(&lease).unwrap();
    assert!(other
        .try_obtain_lease("execute:/w", deadline)
        .unwrap()
        .is_some());
}

#[test]
fn sweeper_reclaims_only_expired_leases() {
    let ts = open_store();
    let now = SystemTime::now();

    ts.store
        .try_obtain_lease("stale", now - Duration::from_secs(1))
        .unwrap()
        .expect("acquired");
    ts.store
        .try_obtain_lease("live", now + Duration::from_secs(60))
        .unwrap()
        .expect("acquired");

    ts.store.clean_leases(now).unwrap();

    assert!(
        ts.store
            .try_obtain_lease("stale", now + Duration::from_secs(60))
            .unwrap()
            .is_some(),
        "expired lease must be reclaimable"
    );
    assert!(
        ts.store
            .try_obtain_lease("live", now + Duration::from_secs(60))
            .unwrap()
            .is_none(),
        "live lease must survive the sweep"
    );
}

#[tokio::test]
async fn with_lease_runs_work_at_most_once_per_window() {
    let ts = open_store();
    let other = ts.reopen();
    let ran = Arc::new(AtomicUsize::new(0));

    let first = {
        let ran = ran.clone();
        ts.store.with_lease("k", Duration::from_secs(30), async move {
            ran.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
    };
    let second = {
        let ran = ran.clone();
        other.with_lease("k", Duration::from_secs(30), async move {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 1, "contended work must be skipped");

    // After release, the key is free again.
    let again = ts
        .store
        .with_lease("k", Duration::from_secs(30), async { Ok(42) })
        .await
        .unwrap();
    assert_eq!(again, Some(42));
}

#[tokio::test]
async fn with_lease_propagates_work_errors_but_still_releases() {
    let ts = open_store();

    let out: anyhow::Result<Option<()>> = ts
        .store
        .with_lease("k", Duration::from_secs(30), async {
            anyhow::bail!("work went wrong")
        })
        .await;
    assert!(out.is_err());

    // The lease was released despite the failure.
    assert!(ts
        .store
        .try_obtain_lease("k", SystemTime::now() + Duration::from_secs(5))
        .unwrap()
        .is_some());
}

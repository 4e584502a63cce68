#![allow(clippy::unwrap_used)]

// A one-shot command and the daemon each run their own manager over the
// same session file. Whatever one writes, the other must honour.

mod common;

use std::time::Duration;

use chrono::TimeDelta;
use pisowall_core::{CoreError, EndReason, SessionRepository};
use pretty_assertions::assert_eq;
use tokio::time::sleep;

use common::{Harness, mac};

#[tokio::test(start_paused = true)]
async fn extension_written_elsewhere_outlives_the_old_deadline() {
    let daemon = Harness::new();
    daemon.manager.spawn_background().await;
    let client = mac("aa:bb:cc:00:00:01");
    let started = daemon.manager.start_minutes(&client, 2, None).await.unwrap();

    sleep(Duration::from_secs(95)).await;
    let cli = daemon.peer();
    cli.manager.hydrate().await.unwrap();
    let extended = cli.manager.extend(&client, 10).await.unwrap();
    assert_eq!(extended.end_time, started.end_time + TimeDelta::minutes(10));

    // Past the deadline the daemon queued at start.
    sleep(Duration::from_secs(30)).await;
    assert!(daemon.manager.is_session_active(&client));
    let stored = daemon.repo.find_active(&client).unwrap().unwrap();
    assert_eq!(stored.end_time, extended.end_time);
    assert_eq!(
        daemon.manager.get_session(&client).unwrap().end_time,
        extended.end_time
    );
    assert_eq!(daemon.manager.scheduled_expiry(&client), Some(extended.end_time));
    assert!(daemon.manager.firewall().is_allowed(&client).await);
    daemon.assert_consistent().await;

    // And it still runs out at the new deadline.
    sleep(Duration::from_secs(600)).await;
    assert!(!daemon.manager.is_session_active(&client));
    let record = &daemon.repo.all_sessions().unwrap()[0];
    assert_eq!(record.end_reason, Some(EndReason::Expired));
    assert!(!daemon.manager.firewall().is_allowed(&client).await);

    daemon.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_written_elsewhere_stops_the_expiry() {
    let daemon = Harness::new();
    daemon.manager.spawn_background().await;
    let client = mac("aa:bb:cc:00:00:01");
    daemon.manager.start_minutes(&client, 2, None).await.unwrap();

    sleep(Duration::from_secs(30)).await;
    let cli = daemon.peer();
    cli.manager.hydrate().await.unwrap();
    cli.manager.pause(&client).await.unwrap();

    sleep(Duration::from_secs(120)).await;
    let runtime = daemon.manager.get_session(&client).unwrap();
    assert!(runtime.paused);
    assert_eq!(daemon.manager.scheduled_expiry(&client), None);
    assert!(daemon.repo.find_active(&client).unwrap().unwrap().paused);
    assert!(!daemon.manager.firewall().is_allowed(&client).await);
    daemon.assert_consistent().await;

    // Resumed elsewhere too; the daemon picks the new deadline up on its
    // next pass.
    let resumed = cli.manager.resume(&client).await.unwrap();
    assert_eq!(resumed.paused_ms, 120_000);
    let report = daemon.manager.reconcile_now().await;
    assert_eq!(report.refreshed, vec![client.clone()]);
    assert_eq!(daemon.manager.scheduled_expiry(&client), Some(resumed.end_time));
    daemon.assert_consistent().await;

    daemon.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn extend_builds_on_the_stored_end_time() {
    let daemon = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    let started = daemon.manager.start_minutes(&client, 2, None).await.unwrap();

    let cli = daemon.peer();
    cli.manager.hydrate().await.unwrap();
    cli.manager.extend(&client, 10).await.unwrap();

    // The daemon's own copy ran out, storage says otherwise.
    sleep(Duration::from_secs(125)).await;
    let extended = daemon.manager.extend(&client, 5).await.unwrap();

    assert_eq!(extended.end_time, started.end_time + TimeDelta::minutes(15));
    assert_eq!(extended.minutes_granted, 17);
    assert_eq!(daemon.manager.scheduled_expiry(&client), Some(extended.end_time));
    daemon.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn session_ended_elsewhere_is_not_found() {
    let daemon = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    daemon.manager.start_minutes(&client, 10, None).await.unwrap();

    let cli = daemon.peer();
    cli.manager.hydrate().await.unwrap();
    cli.manager.end(&client).await.unwrap();

    assert!(matches!(
        daemon.manager.pause(&client).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(!daemon.manager.is_session_active(&client));
    assert_eq!(daemon.manager.scheduled_expiry(&client), None);
    let record = &daemon.repo.all_sessions().unwrap()[0];
    assert_eq!(record.end_reason, Some(EndReason::Manual));
    daemon.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn sweep_keeps_a_session_extended_elsewhere() {
    let daemon = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    daemon.manager.start_minutes(&client, 2, None).await.unwrap();

    let cli = daemon.peer();
    cli.manager.hydrate().await.unwrap();
    let extended = cli.manager.extend(&client, 10).await.unwrap();

    sleep(Duration::from_secs(125)).await;
    let report = daemon.manager.reconcile_now().await;

    assert!(report.expired.is_empty());
    assert_eq!(report.refreshed, vec![client.clone()]);
    assert!(daemon.manager.is_session_active(&client));
    assert_eq!(daemon.manager.scheduled_expiry(&client), Some(extended.end_time));
    daemon.assert_consistent().await;
}

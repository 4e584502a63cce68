#![allow(clippy::unwrap_used)]

mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::TimeDelta;
use pisowall_core::{
    CoreError, EndReason, InvalidStateReason, MacAddress, SessionEvent, SessionRepository,
    SessionState,
};
use pisowall_netfilter::Fault;
use pretty_assertions::assert_eq;
use tokio::time::sleep;

use common::{Harness, mac};

#[tokio::test(start_paused = true)]
async fn start_persists_allows_and_announces() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    let mut events = h.manager.events();

    let session = h
        .manager
        .start(&client, 5, Some(Ipv4Addr::new(10, 0, 0, 42)))
        .await
        .unwrap();

    assert_eq!(session.minutes_granted, 60);
    assert_eq!(session.pesos_spent, 5);
    assert_eq!(h.manager.time_remaining(&client).unwrap(), 3600);
    assert!(h.manager.is_session_active(&client));
    assert!(h.manager.firewall().is_allowed(&client).await);
    assert_eq!(h.repo.find_active(&client).unwrap(), Some(session.clone()));
    assert_eq!(
        h.manager.get_session_by_ip(Ipv4Addr::new(10, 0, 0, 42)),
        Some(session.clone())
    );
    assert_eq!(
        h.manager.scheduled_expiry(&client),
        Some(session.end_time)
    );
    assert!(matches!(
        events.try_recv().unwrap(),
        SessionEvent::Started { session: s } if s.mac == client
    ));
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn voucher_start_grants_minutes_without_pesos() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");

    let session = h.manager.start_minutes(&client, 45, None).await.unwrap();

    assert_eq!(session.minutes_granted, 45);
    assert_eq!(session.pesos_spent, 0);
    assert_eq!(h.manager.time_remaining(&client).unwrap(), 45 * 60);
}

#[tokio::test(start_paused = true)]
async fn second_start_for_same_mac_is_rejected() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start(&client, 5, None).await.unwrap();

    let err = h.manager.start(&client, 10, None).await.unwrap_err();

    assert!(matches!(err, CoreError::DuplicateSession { .. }));
    assert_eq!(h.repo.active_sessions().unwrap().len(), 1);
    assert_eq!(h.manager.get_session(&client).unwrap().minutes_granted, 60);
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_yield_one_session() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");

    let (a, b) = tokio::join!(
        h.manager.start(&client, 5, None),
        h.manager.start(&client, 5, None)
    );

    assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
    assert_eq!(h.repo.active_sessions().unwrap().len(), 1);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn zero_credit_is_refused() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");

    let err = h.manager.start(&client, 0, None).await.unwrap_err();
    assert_eq!(
        err.invalid_state_reason(),
        Some(InvalidStateReason::ZeroCredit)
    );
    assert!(h.manager.get_session(&client).is_none());

    h.manager.start(&client, 5, None).await.unwrap();
    let err = h.manager.extend(&client, 0).await.unwrap_err();
    assert_eq!(
        err.invalid_state_reason(),
        Some(InvalidStateReason::ZeroCredit)
    );
}

#[tokio::test(start_paused = true)]
async fn extend_adds_time_and_pesos() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    let started = h.manager.start(&client, 5, None).await.unwrap();

    let extended = h.manager.extend_pesos(&client, 10).await.unwrap();

    assert_eq!(extended.end_time, started.end_time + TimeDelta::minutes(150));
    assert_eq!(extended.pesos_spent, 15);
    assert_eq!(extended.minutes_granted, 210);
    assert_eq!(h.manager.scheduled_expiry(&client), Some(extended.end_time));
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn operations_on_unknown_mac_are_not_found() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");

    assert!(matches!(
        h.manager.extend(&client, 5).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(
        h.manager.pause(&client).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(
        h.manager.resume(&client).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(
        h.manager.time_remaining(&client),
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_time_and_resume_credits_it_back() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    let started = h.manager.start_minutes(&client, 10, None).await.unwrap();

    sleep(Duration::from_secs(60)).await;
    let paused = h.manager.pause(&client).await.unwrap();
    assert_eq!(paused.state(), SessionState::Paused);
    assert_eq!(h.manager.time_remaining(&client).unwrap(), 540);
    assert!(!h.manager.firewall().is_allowed(&client).await);
    assert_eq!(h.manager.scheduled_expiry(&client), None);
    h.assert_consistent().await;

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.manager.time_remaining(&client).unwrap(), 540);

    sleep(Duration::from_secs(1)).await;
    let resumed = h.manager.resume(&client).await.unwrap();

    assert_eq!(resumed.end_time, started.end_time + TimeDelta::seconds(3));
    assert_eq!(resumed.paused_ms, 3000);
    assert_eq!(resumed.paused_at, None);
    assert_eq!(h.manager.time_remaining(&client).unwrap(), 540);
    assert!(h.manager.firewall().is_allowed(&client).await);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn upper_case_mac_pauses_and_resumes_like_any_other() {
    let h = Harness::new();
    let client = MacAddress::parse("AA:BB:CC:DD:EE:FF").unwrap();
    let started = h.manager.start(&client, 5, None).await.unwrap();
    let remaining = h.manager.time_remaining(&client).unwrap();

    h.manager.pause(&client).await.unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.manager.time_remaining(&client).unwrap(), remaining);
    sleep(Duration::from_secs(3)).await;
    let resumed = h.manager.resume(&client).await.unwrap();

    assert_eq!(resumed.end_time, started.end_time + TimeDelta::seconds(5));
    assert_eq!(resumed.paused_ms, 5000);
    assert_eq!(h.manager.time_remaining(&client).unwrap(), remaining);

    let lower = mac("aa:bb:cc:dd:ee:ff");
    assert_eq!(h.manager.get_session(&lower), Some(resumed));
    assert!(h.manager.firewall().is_allowed(&lower).await);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_reject_wrong_state() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start(&client, 5, None).await.unwrap();

    let err = h.manager.resume(&client).await.unwrap_err();
    assert_eq!(err.invalid_state_reason(), Some(InvalidStateReason::NotPaused));

    h.manager.pause(&client).await.unwrap();
    let err = h.manager.pause(&client).await.unwrap_err();
    assert_eq!(
        err.invalid_state_reason(),
        Some(InvalidStateReason::AlreadyPaused)
    );
    assert!(err.is_caller_error());
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn extending_a_paused_session_keeps_it_paused() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start_minutes(&client, 10, None).await.unwrap();
    h.manager.pause(&client).await.unwrap();

    h.manager.extend(&client, 5).await.unwrap();

    assert_eq!(h.manager.time_remaining(&client).unwrap(), 15 * 60);
    assert_eq!(h.manager.scheduled_expiry(&client), None);
    assert!(!h.manager.firewall().is_allowed(&client).await);
}

#[tokio::test(start_paused = true)]
async fn end_is_idempotent() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start(&client, 5, None).await.unwrap();
    let mut events = h.manager.events();

    let ended = h.manager.end(&client).await.unwrap().unwrap();
    assert!(!ended.active);
    assert_eq!(ended.end_reason, Some(EndReason::Manual));
    assert!(matches!(
        events.try_recv().unwrap(),
        SessionEvent::Ended { reason: EndReason::Manual, .. }
    ));

    assert_eq!(h.manager.end(&client).await.unwrap(), None);
    assert_eq!(
        h.manager.end(&mac("aa:bb:cc:00:00:99")).await.unwrap(),
        None
    );
    assert!(events.try_recv().is_err());

    assert!(!h.manager.is_session_active(&client));
    assert!(!h.manager.firewall().is_allowed(&client).await);
    assert_eq!(h.manager.history().await.unwrap().len(), 1);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn client_can_start_again_after_end() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start(&client, 5, None).await.unwrap();
    h.manager.end(&client).await.unwrap();

    h.manager.start(&client, 1, None).await.unwrap();

    assert!(h.manager.firewall().is_allowed(&client).await);
    assert_eq!(h.manager.history().await.unwrap().len(), 2);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn expiry_ends_session_and_blocks() {
    let h = Harness::new();
    h.manager.spawn_background().await;
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start_minutes(&client, 1, None).await.unwrap();

    sleep(Duration::from_secs(59)).await;
    assert!(h.manager.is_session_active(&client));

    sleep(Duration::from_secs(2)).await;
    assert!(!h.manager.is_session_active(&client));
    assert!(!h.manager.firewall().is_allowed(&client).await);
    let record = &h.manager.history().await.unwrap()[0];
    assert_eq!(record.end_reason, Some(EndReason::Expired));
    h.assert_consistent().await;

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn extension_moves_the_expiry() {
    let h = Harness::new();
    h.manager.spawn_background().await;
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start_minutes(&client, 1, None).await.unwrap();
    h.manager.extend(&client, 1).await.unwrap();

    sleep(Duration::from_secs(90)).await;
    assert!(h.manager.is_session_active(&client));

    sleep(Duration::from_secs(40)).await;
    assert!(!h.manager.is_session_active(&client));

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn paused_session_never_expires() {
    let h = Harness::new();
    h.manager.spawn_background().await;
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start_minutes(&client, 1, None).await.unwrap();
    sleep(Duration::from_secs(30)).await;
    h.manager.pause(&client).await.unwrap();

    sleep(Duration::from_secs(600)).await;
    assert!(h.manager.is_session_active(&client));
    assert_eq!(h.manager.time_remaining(&client).unwrap(), 30);

    h.manager.resume(&client).await.unwrap();
    sleep(Duration::from_secs(31)).await;
    assert!(!h.manager.is_session_active(&client));

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_write_leaves_runtime_untouched() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    let other = mac("aa:bb:cc:00:00:02");
    h.manager.start(&client, 5, None).await.unwrap();

    h.repo.set_fail_writes(true);

    assert!(matches!(
        h.manager.start(&other, 5, None).await,
        Err(CoreError::Persistence { .. })
    ));
    assert!(h.manager.get_session(&other).is_none());
    assert!(!h.manager.firewall().is_allowed(&other).await);

    assert!(matches!(
        h.manager.pause(&client).await,
        Err(CoreError::Persistence { .. })
    ));
    assert_eq!(h.manager.get_session(&client).unwrap().state(), SessionState::Active);
    assert!(h.manager.firewall().is_allowed(&client).await);

    assert!(h.manager.end(&client).await.is_err());
    assert!(h.manager.is_session_active(&client));

    h.repo.set_fail_writes(false);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn start_commits_even_when_firewall_is_down() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.backend.set_fault(Some(Fault::Unavailable));

    let err = h.manager.start(&client, 5, None).await.unwrap_err();

    assert!(matches!(err, CoreError::DriverUnavailable { .. }));
    assert!(err.is_enforcement_error());
    assert!(h.manager.is_session_active(&client));
    assert!(h.repo.find_active(&client).unwrap().is_some());

    h.backend.set_fault(None);
    let report = h.manager.reconcile_now().await;
    assert_eq!(report.healed.len(), 1);
    h.assert_consistent().await;
}

#[tokio::test(start_paused = true)]
async fn ignored_block_surfaces_enforcement_failure() {
    let h = Harness::new();
    let client = mac("aa:bb:cc:00:00:01");
    h.manager.start(&client, 5, None).await.unwrap();
    h.backend.set_fault(Some(Fault::IgnoreWrites));

    let err = h.manager.pause(&client).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::EnforcementFailed { operation: "pause", .. }
    ));
    // The pause itself is committed; the firewall is what lags.
    assert_eq!(h.manager.get_session(&client).unwrap().state(), SessionState::Paused);
    assert!(h.manager.firewall().is_allowed(&client).await);
}

#[tokio::test(start_paused = true)]
async fn clients_are_independent() {
    let h = Harness::new();
    let macs: Vec<_> = (1..=5)
        .map(|i| mac(&format!("aa:bb:cc:00:00:0{i}")))
        .collect();

    let results =
        futures_util::future::join_all(macs.iter().map(|m| h.manager.start(m, 5, None))).await;
    assert!(results.iter().all(Result::is_ok));

    h.manager.pause(&macs[1]).await.unwrap();
    h.manager.end(&macs[2]).await.unwrap();

    assert_eq!(h.manager.list_active().len(), 4);
    assert!(h.manager.firewall().is_allowed(&macs[0]).await);
    assert!(!h.manager.firewall().is_allowed(&macs[1]).await);
    assert!(!h.manager.firewall().is_allowed(&macs[2]).await);
    h.assert_consistent().await;
}

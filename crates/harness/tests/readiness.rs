//! Readiness probe against a local fake endpoint

mod common;

use std::time::Duration;

use disttest_harness::{ProbeOutcome, ReadinessProbe, RetryPolicy};

use common::{unused_port, FakeRealm};

fn policy(interval_ms: u64, deadline_ms: u64) -> RetryPolicy {
    RetryPolicy {
        interval: Duration::from_millis(interval_ms),
        deadline: Duration::from_millis(deadline_ms),
    }
}

#[tokio::test]
async fn ready_once_endpoint_answers_ok() {
    let realm = FakeRealm::ready_after(Duration::from_secs(1)).await;
    let probe = ReadinessProbe::new(policy(200, 10_000)).unwrap();
    let url = format!("http://127.0.0.1:{}/realms/master/", realm.port);

    let outcome = probe.wait_for_ready(&url).await;

    match outcome {
        ProbeOutcome::Ready { attempts, elapsed } => {
            assert!(elapsed >= Duration::from_secs(1));
            assert!(attempts >= 5, "503 answers must be retried, got {} attempts", attempts);
        }
        other => panic!("expected ready, got {:?}", other),
    }
    assert!(realm.requests().len() >= outcome.attempts());
}

#[tokio::test]
async fn first_attempt_waits_one_interval() {
    let realm = FakeRealm::ready_after(Duration::ZERO).await;
    let probe = ReadinessProbe::new(policy(300, 5_000)).unwrap();
    let url = format!("http://127.0.0.1:{}/realms/master/", realm.port);

    match probe.wait_for_ready(&url).await {
        ProbeOutcome::Ready { attempts, elapsed } => {
            assert_eq!(attempts, 1);
            assert!(elapsed >= Duration::from_millis(300));
        }
        other => panic!("expected ready, got {:?}", other),
    }
}

#[tokio::test]
async fn refused_connections_time_out_within_bound() {
    let probe = ReadinessProbe::new(policy(200, 1_000)).unwrap();
    let url = format!("http://127.0.0.1:{}/realms/master/", unused_port());

    match probe.wait_for_ready(&url).await {
        ProbeOutcome::TimedOut { attempts, elapsed } => {
            assert!(attempts >= 3);
            assert!(elapsed >= Duration::from_secs(1));
            assert!(elapsed < Duration::from_millis(1_200 + 500), "took {:?}", elapsed);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn endpoint_that_never_recovers_times_out() {
    let realm = FakeRealm::ready_after(Duration::from_secs(3_600)).await;
    let probe = ReadinessProbe::new(policy(100, 800)).unwrap();
    let url = format!("http://127.0.0.1:{}/realms/master/", realm.port);

    let outcome = probe.wait_for_ready(&url).await;

    assert!(!outcome.is_ready());
    assert!(realm
        .requests()
        .iter()
        .all(|r| r.starts_with("GET /realms/master/ ")));
}

#[tokio::test]
async fn untrusted_certificate_and_hostname_are_accepted() {
    let realm = FakeRealm::tls_ready_after(Duration::ZERO).await;
    let url = format!("https://127.0.0.1:{}/realms/master/", realm.port);

    // A verifying client refuses the self-signed cert issued for another host
    assert!(reqwest::Client::new().get(&url).send().await.is_err());

    let probe = ReadinessProbe::new(policy(100, 5_000)).unwrap();
    match probe.wait_for_ready(&url).await {
        ProbeOutcome::Ready { attempts, .. } => assert_eq!(attempts, 1),
        other => panic!("expected ready over TLS, got {:?}", other),
    }
    assert!(realm
        .requests()
        .iter()
        .any(|r| r.starts_with("GET /realms/master/ ")));
}

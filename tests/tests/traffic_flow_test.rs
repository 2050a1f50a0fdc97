//! Synthetic traffic against a ready fleet, with virtual time.

use std::sync::Arc;
use std::time::Duration;
use streamslab_integration_tests::integration::LabHarness;
use streamslab_lab::{generate_traffic, Status};

#[tokio::test(start_paused = true)]
async fn traffic_flows_while_ready_and_drains_on_stop() {
    let harness = LabHarness::with_three_nodes();
    harness.lab.start().await.unwrap();
    assert_eq!(harness.lab.status(), Status::Ready);

    let lab = Arc::clone(&harness.lab);
    let generator = tokio::spawn(async move {
        generate_traffic(lab.as_ref(), 1_000).await;
    });

    // Three nodes make one request per 10s round; let a few rounds pass.
    tokio::time::sleep(Duration::from_secs(35)).await;

    harness.lab.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(60), generator)
        .await
        .expect("generator kept running after the lab left Ready")
        .unwrap();

    let payments = harness.fleet.activity().events_with_prefix("PAY ");
    assert!(!payments.is_empty(), "no payments were attempted");
    assert!(!harness.sink.events_with_prefix("PAYMENT_OK").is_empty());

    let events = harness.sink.events();
    let started = events.iter().position(|e| e == "TRAFFIC_START exp_line");
    let stopped = events.iter().position(|e| e == "TRAFFIC_STOP exp_line");
    assert!(started.is_some() && started < stopped, "events: {:?}", events);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_the_inter_request_wait() {
    let harness = LabHarness::with_three_nodes();
    harness.lab.start().await.unwrap();

    let lab = Arc::clone(&harness.lab);
    let generator = tokio::spawn(async move {
        generate_traffic(lab.as_ref(), 1_000).await;
    });

    // Mid-round, during the 10s inter-request sleep.
    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.lab.shutdown();

    tokio::time::timeout(Duration::from_secs(5), generator)
        .await
        .expect("generator did not react to shutdown before its wait elapsed")
        .unwrap();
}

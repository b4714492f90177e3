use std::sync::Arc;
use std::time::Duration;

use flowmesh::resume::{ResumeChannel, ResumeChannelRegistry, ResumeSignal};

fn continue_signal() -> ResumeSignal {
    ResumeSignal {
        action: "continue".into(),
        reason: Some("looks good".into()),
        user_id: "reviewer".into(),
        paused_node_id: "human_input".into(),
    }
}

#[tokio::test]
async fn signal_reaches_blocked_waiter() {
    let registry = Arc::new(ResumeChannelRegistry::default());
    let channel = registry.register("run-1");

    let waiter = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.wait_for_signal(Some(Duration::from_secs(5))).await })
    };

    // Let the waiter block before the transport delivers the decision.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(registry.send_signal("run-1", continue_signal()));

    let received = waiter.await.unwrap();
    assert_eq!(received, Some(continue_signal()));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_result_coded_not_an_error() {
    let channel = ResumeChannel::new();
    assert_eq!(
        channel.wait_for_signal(Some(Duration::from_millis(50))).await,
        None
    );
    // The channel is still usable after a timed-out wait.
    assert!(channel.send_signal(continue_signal()));
}

#[tokio::test(start_paused = true)]
async fn unset_timeout_still_honors_hard_ceiling() {
    let channel = ResumeChannel::new();
    let started = tokio::time::Instant::now();
    assert_eq!(channel.wait_for_signal(None).await, None);
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert!(started.elapsed() < Duration::from_secs(301));
}

#[tokio::test]
async fn replacing_registration_unblocks_old_waiter() {
    let registry = Arc::new(ResumeChannelRegistry::default());
    let first = registry.register("run-1");

    let waiter = {
        let first = Arc::clone(&first);
        tokio::spawn(async move { first.wait_for_signal(Some(Duration::from_secs(5))).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Re-registration closes the superseded channel; its waiter sees None.
    let second = registry.register("run-1");
    assert_eq!(waiter.await.unwrap(), None);

    // The replacement channel is live.
    assert!(registry.send_signal("run-1", continue_signal()));
    assert_eq!(
        second.wait_for_signal(Some(Duration::from_millis(100))).await,
        Some(continue_signal())
    );
}

#[tokio::test]
async fn signals_only_reach_their_own_run() {
    let registry = ResumeChannelRegistry::default();
    let one = registry.register("run-1");
    let two = registry.register("run-2");

    assert!(registry.send_signal("run-2", continue_signal()));

    assert_eq!(
        two.wait_for_signal(Some(Duration::from_millis(50))).await,
        Some(continue_signal())
    );
    assert_eq!(
        one.wait_for_signal(Some(Duration::from_millis(50))).await,
        None
    );
}

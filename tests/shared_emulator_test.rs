use std::time::Duration;
use stream_fixture::stream_emulator::SharedEmulator;
use stream_fixture::{init_tracing, LifecycleState, PollPolicy, Record, StreamHarness};

/// Several harnesses share the process-wide emulator; the last `close`
/// stops it.
#[tokio::test]
async fn test_harnesses_share_one_emulator() {
    init_tracing();
    let poll = PollPolicy::every(Duration::from_millis(5));

    let orders = StreamHarness::builder("orders")
        .poll_policy(poll.clone())
        .build()
        .await
        .unwrap();
    let users = StreamHarness::builder("users")
        .shards(2)
        .poll_policy(poll)
        .build()
        .await
        .unwrap();
    assert_eq!(SharedEmulator::leases(), 2);
    assert_ne!(orders.stream_name(), users.stream_name());

    orders.load(vec![Record::new("o", "1")]).await.unwrap();
    users.start().await.unwrap();

    // Both streams live in the same emulator.
    let listed = orders.client().list_streams().await.unwrap();
    assert!(listed.contains(&orders.stream_name().to_string()));
    assert!(listed.contains(&users.stream_name().to_string()));

    orders.delete().await.unwrap();
    users.delete().await.unwrap();
    assert_eq!(orders.state(), LifecycleState::NotStarted);

    orders.close().await.unwrap();
    assert_eq!(SharedEmulator::leases(), 1);
    // Still usable by the remaining harness.
    users.start().await.unwrap();
    users.delete().await.unwrap();

    users.close().await.unwrap();
    assert_eq!(SharedEmulator::leases(), 0);

    // A new harness brings the emulator back up.
    let again = StreamHarness::builder("again")
        .poll_policy(PollPolicy::every(Duration::from_millis(5)))
        .build()
        .await
        .unwrap();
    again.start().await.unwrap();
    again.delete().await.unwrap();
    again.close().await.unwrap();
}

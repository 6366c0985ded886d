/// Status shared memory and change-semaphore scenarios. These touch the
/// process-global POSIX test-mode names, so they are serialised.
mod common;

use common::TestDaemon;
use esdm::rpc::{StatusPublisher, StatusReader};
use esdm::state::SeedState;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

/// Wire a publisher to the daemon's state machine the way the server
/// binary does.
fn attach_publisher(daemon: &TestDaemon) -> Arc<StatusPublisher> {
    let publisher = Arc::new(StatusPublisher::create(true, 4).expect("shm create"));
    publisher.publish(&daemon.ctx.status_report(), false, true);
    let weak = Arc::downgrade(&daemon.ctx);
    let p = Arc::clone(&publisher);
    daemon.ctx.state.register_observer(Box::new(move |state| {
        if let Some(ctx) = weak.upgrade() {
            p.publish(
                &ctx.status_report(),
                state >= SeedState::Operational,
                state < SeedState::FullySeeded,
            );
        }
    }));
    publisher
}

#[test]
#[serial]
fn test_reader_sees_record() {
    let daemon = TestDaemon::start();
    let _publisher = attach_publisher(&daemon);

    let reader = StatusReader::attach(true).expect("attach");
    assert_eq!(reader.version(), esdm::rpc::shm::SHM_STATUS_VERSION);
    assert_eq!(reader.unpriv_threads(), 4);
    assert!(!reader.operational());
    assert!(reader.need_entropy());
    assert!(reader.info().contains("ESDM server"));
}

#[test]
#[serial]
fn test_every_state_advance_posts_exactly_once() {
    let daemon = TestDaemon::start();
    let _publisher = attach_publisher(&daemon);

    let reader = StatusReader::attach(true).expect("attach");
    // Drain the initial publish
    while reader.try_take_signal() {}

    // One full seeding pass advances MinSeeded → FullySeeded →
    // Operational: three transitions, three posts
    daemon.seed_once();

    let mut signals = 0;
    while reader.try_take_signal() {
        signals += 1;
    }
    assert_eq!(signals, 3, "one semaphore post per state advance");

    assert!(reader.operational());
    assert!(!reader.need_entropy());
    assert!(reader.info().contains("Operational"));
}

#[test]
#[serial]
fn test_reader_blocks_until_change() {
    let daemon = TestDaemon::start();
    let _publisher = attach_publisher(&daemon);

    let reader = StatusReader::attach(true).expect("attach");
    while reader.try_take_signal() {}

    assert!(
        !reader.wait_signal(Duration::from_millis(200)),
        "no change, no signal"
    );

    daemon.seed_once();
    assert!(
        reader.wait_signal(Duration::from_secs(5)),
        "state change must post the semaphore"
    );
}

mod common;

use common::*;
use smartybridge::session::{ControlAction, SessionClient, SessionError};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn connect_registers_will_then_announces_and_subscribes() {
    let log = EventLog::new();
    let session = SessionClient::connect(&identity(), &endpoint(), FakeBroker::new(&log), session_settings())
        .await
        .unwrap();

    assert_eq!(
        log.events(),
        vec![
            Event::Open {
                client_id: CLIENT_ID.to_string(),
                will_topic: "smarty_control".to_string(),
                will_payload: b"logoff/a1b2c3d4_smarty/lastwill".to_vec(),
            },
            publish("smarty_control", b"logon/a1b2c3d4_smarty"),
            Event::Subscribe("smarty_control".to_string()),
        ]
    );

    let handle = session.handle().unwrap();
    assert_eq!(handle.client_id, CLIENT_ID);
    assert_eq!(handle.will_topic, "smarty_control");
    assert_eq!(handle.will_payload, "logoff/a1b2c3d4_smarty/lastwill");
    assert_eq!(handle.keepalive_secs, 60);
}

#[tokio::test(start_paused = true)]
async fn logon_waits_for_settle_delay() {
    let log = EventLog::new();
    SessionClient::connect(&identity(), &endpoint(), FakeBroker::new(&log), session_settings())
        .await
        .unwrap();

    let timed = log.timed();
    let opened: Instant = timed[0].0;
    let announced: Instant = timed[1].0;
    assert!(announced - opened >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn disconnect_publishes_logoff_before_closing() {
    let log = EventLog::new();
    let mut session =
        SessionClient::connect(&identity(), &endpoint(), FakeBroker::new(&log), session_settings())
            .await
            .unwrap();

    session.disconnect().await.unwrap();
    let events = log.events();
    assert_eq!(
        &events[events.len() - 2..],
        &[
            publish("smarty_control", b"logoff/a1b2c3d4_smarty"),
            Event::Close
        ]
    );

    // A second disconnect does nothing.
    session.disconnect().await.unwrap();
    assert_eq!(log.count(&Event::Close), 1);
}

#[tokio::test(start_paused = true)]
async fn calls_after_disconnect_are_rejected() {
    let log = EventLog::new();
    let mut session =
        SessionClient::connect(&identity(), &endpoint(), FakeBroker::new(&log), session_settings())
            .await
            .unwrap();
    session.disconnect().await.unwrap();

    assert!(matches!(
        session.publish_data(b"late").await,
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        session.poll_incoming().await,
        Err(SessionError::NotConnected)
    ));
    assert!(log.published_on("smarty_data").is_empty());
}

#[tokio::test(start_paused = true)]
async fn refused_connection_publishes_nothing() {
    let log = EventLog::new();
    let result = SessionClient::connect(
        &identity(),
        &endpoint(),
        FakeBroker::new(&log).refusing(5),
        session_settings(),
    )
    .await;

    match result {
        Err(SessionError::Refused(5)) => {}
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("connect should fail"),
    }
    assert_eq!(log.publish_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_broker_call_times_out() {
    let log = EventLog::new();
    let started = Instant::now();
    let result = SessionClient::connect(
        &identity(),
        &endpoint(),
        FakeBroker::new(&log).hanging(),
        session_settings(),
    )
    .await;

    match result {
        Err(SessionError::Timeout(operation, limit)) => {
            assert_eq!(operation, "logon publish");
            assert_eq!(limit, Duration::from_millis(10_000));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("connect should time out"),
    }
    assert!(started.elapsed() >= Duration::from_millis(10_500));
}

#[tokio::test(start_paused = true)]
async fn poll_applies_reset_and_ignores_everything_else() {
    let log = EventLog::new();
    let broker = FakeBroker::new(&log)
        .with_inbound(Duration::ZERO, "smarty_control", b"logon/other_smarty")
        .with_inbound(Duration::ZERO, "smarty_control", b"Reset")
        .with_inbound(Duration::from_secs(5), "smarty_control", b"reset");
    let mut session = SessionClient::connect(&identity(), &endpoint(), broker, session_settings())
        .await
        .unwrap();

    assert_eq!(session.poll_incoming().await.unwrap(), ControlAction::Ignore);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.poll_incoming().await.unwrap(), ControlAction::Reset);
}

#[tokio::test(start_paused = true)]
async fn poll_drains_at_most_inbox_limit() {
    let log = EventLog::new();
    let mut broker = FakeBroker::new(&log);
    for _ in 0..3 {
        broker = broker.with_inbound(Duration::ZERO, "smarty_control", b"noise");
    }
    broker = broker.with_inbound(Duration::ZERO, "smarty_control", b"reset");
    let mut settings = session_settings();
    settings.inbox_limit = 2;
    let mut session = SessionClient::connect(&identity(), &endpoint(), broker, settings)
        .await
        .unwrap();

    // noise, noise | noise, reset
    assert_eq!(session.poll_incoming().await.unwrap(), ControlAction::Ignore);
    assert_eq!(session.poll_incoming().await.unwrap(), ControlAction::Reset);
}

//! Connection handling during `init` and `close`.

use eventkv::backend::ConnectionEvent;
use eventkv::config::StoreConfig;
use eventkv::errors::{ConnectionError, EventstoreError};
use eventkv::eventstore::{Eventstore, EventstoreOptions};
use eventkv::store::KeyValueStore;
use eventkv_integration_tests::{chaos_eventstore, fast_retry, memory_backend};
use eventkv_testing::ChaosConfig;
use std::time::Duration;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn init_outlasts_a_slow_backend() {
    let mut eventstore = chaos_eventstore(ChaosConfig::default().with_failing_connects(3))
        .with_options(
            EventstoreOptions::default()
                .with_init_timeout(Duration::from_secs(2))
                .with_connect_retry(fast_retry(u32::MAX)),
        );

    eventstore.init().await.unwrap();

    assert_eq!(eventstore.store().backend().connect_attempts(), 4);
    assert!(logs_contain("connection failed, retrying"));
}

#[tokio::test]
async fn init_gives_up_when_the_window_closes() {
    let mut eventstore = chaos_eventstore(ChaosConfig::default().with_failing_connects(u32::MAX))
        .with_options(
            EventstoreOptions::default()
                .with_init_timeout(Duration::from_millis(40))
                .with_connect_retry(fast_retry(u32::MAX)),
        );

    let err = eventstore.init().await.unwrap_err();

    match err {
        EventstoreError::Connection(ConnectionError::TimedOut {
            timeout, attempts, ..
        }) => {
            assert_eq!(timeout, Duration::from_millis(40));
            assert!(attempts > 1);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn attempt_budget_also_ends_init() {
    let mut eventstore = chaos_eventstore(ChaosConfig::default().with_failing_connects(u32::MAX))
        .with_options(
            EventstoreOptions::default()
                .with_init_timeout(Duration::from_secs(10))
                .with_connect_retry(fast_retry(3)),
        );

    let err = eventstore.init().await.unwrap_err();

    assert!(matches!(
        err,
        EventstoreError::Connection(ConnectionError::TimedOut { attempts: 3, .. })
    ));
    assert_eq!(eventstore.store().backend().connect_attempts(), 3);
}

#[tokio::test]
async fn timeout_comes_from_store_configuration() {
    let config = StoreConfig::default().with_timeout(Duration::from_millis(1500));

    let options = EventstoreOptions::from_store_config(&config);

    assert_eq!(options.init_timeout, Duration::from_millis(1500));
}

#[tokio::test]
async fn connection_events_are_forwarded() {
    let mut eventstore = Eventstore::new(KeyValueStore::new(
        memory_backend(),
        &StoreConfig::default(),
    ));
    let mut events = eventstore.connection_events();

    eventstore.init().await.unwrap();
    eventstore.init().await.unwrap();
    eventstore.close().await.unwrap();

    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected);
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
    assert!(events.try_recv().is_err());
}

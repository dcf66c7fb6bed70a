use std::time::Duration;

use conveyor_core::message::SyncMessage;
use conveyor_server::hub::{Hub, HubConfig, HubError, ObserverState};

fn message(pipeline_id: i64) -> SyncMessage {
    SyncMessage::DeletePipeline { pipeline_id }
}

#[tokio::test]
async fn test_every_observer_gets_every_message_in_order() {
    let hub = Hub::spawn(HubConfig::default());
    let mut observers = Vec::new();
    for _ in 0..3 {
        observers.push(hub.subscribe().await.unwrap());
    }

    for id in 1..=10 {
        hub.publish(message(id)).unwrap();
    }
    assert_eq!(hub.flush().await.unwrap(), 3);

    for observer in &mut observers {
        for id in 1..=10 {
            assert_eq!(observer.recv().await, Some(message(id)));
        }
    }
}

#[tokio::test]
async fn test_dropped_observer_is_gone_on_next_publish() {
    let hub = Hub::spawn(HubConfig::default());
    let mut staying = hub.subscribe().await.unwrap();
    let leaving = hub.subscribe().await.unwrap();
    assert_eq!(hub.flush().await.unwrap(), 2);

    drop(leaving);
    hub.publish(message(1)).unwrap();

    assert_eq!(hub.flush().await.unwrap(), 1);
    assert_eq!(hub.observer_count(), 1);
    assert_eq!(staying.recv().await, Some(message(1)));
}

#[tokio::test]
async fn test_slow_observer_is_deregistered_without_hurting_others() {
    let hub = Hub::spawn(HubConfig {
        observer_buffer: 1,
        write_timeout: Duration::from_millis(50),
        ..HubConfig::default()
    });

    let mut slow = hub.subscribe().await.unwrap();
    let mut fast = hub.subscribe().await.unwrap();

    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(fast.recv().await);
        }
        received
    });

    for id in 1..=3 {
        hub.publish(message(id)).unwrap();
    }

    assert_eq!(hub.flush().await.unwrap(), 1);
    assert_eq!(
        reader.await.unwrap(),
        vec![Some(message(1)), Some(message(2)), Some(message(3))]
    );

    // the slow observer keeps what it had buffered, then sees the end
    assert_eq!(slow.recv().await, Some(message(1)));
    assert_eq!(slow.recv().await, None);
    assert_eq!(slow.state(), ObserverState::Closed);
}

#[tokio::test]
async fn test_no_delivery_after_close() {
    let hub = Hub::spawn(HubConfig::default());
    let mut observer = hub.subscribe().await.unwrap();

    hub.publish(message(1)).unwrap();
    hub.flush().await.unwrap();

    observer.close();
    assert_eq!(observer.state(), ObserverState::Closing);
    hub.publish(message(2)).unwrap();
    assert_eq!(hub.flush().await.unwrap(), 0);

    assert_eq!(observer.recv().await, Some(message(1)));
    assert_eq!(observer.recv().await, None);
    assert_eq!(observer.state(), ObserverState::Closed);
    assert_eq!(observer.recv().await, None);
}

#[tokio::test]
async fn test_unsubscribe_by_id() {
    let hub = Hub::spawn(HubConfig::default());
    let mut observer = hub.subscribe().await.unwrap();

    hub.unsubscribe(observer.id());
    assert_eq!(hub.flush().await.unwrap(), 0);
    assert_eq!(observer.recv().await, None);
}

#[tokio::test]
async fn test_full_queue_drops_new_messages() {
    let (hub, worker) = Hub::new(HubConfig {
        queue_capacity: 4,
        ..HubConfig::default()
    });

    for id in 1..=4 {
        hub.publish(message(id)).unwrap();
    }
    assert_eq!(hub.publish(message(5)), Err(HubError::QueueFull));
    assert_eq!(hub.publish(message(6)), Err(HubError::QueueFull));
    assert_eq!(hub.dropped_messages(), 2);

    tokio::spawn(worker.run());
    hub.flush().await.unwrap();

    // room again once the worker drained the queue
    hub.publish(message(7)).unwrap();
    assert_eq!(hub.dropped_messages(), 2);
}

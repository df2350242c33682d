use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tungstenite::protocol::Message as WsMessage;

use super::engine::{Broker, BrokerOptions};
use crate::persistence::Persistence;
use crate::transport::message::ServerMessage;
use crate::utils::error::BrokerError;

fn broker_in(dir: &TempDir, options: BrokerOptions) -> Broker {
    let persistence = Persistence::open(dir.path().to_str().unwrap()).unwrap();
    Broker::recover(persistence, options).unwrap()
}

fn test_broker() -> (Broker, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_in(&dir, BrokerOptions::default());
    (broker, dir)
}

fn channel() -> (UnboundedSender<WsMessage>, UnboundedReceiver<WsMessage>) {
    mpsc::unbounded_channel()
}

fn next_frame(rx: &mut UnboundedReceiver<WsMessage>) -> Option<ServerMessage> {
    let ws = rx.try_recv().ok()?;
    Some(serde_json::from_str(ws.to_text().unwrap()).unwrap())
}

fn expect_delivery(rx: &mut UnboundedReceiver<WsMessage>) -> (u64, String) {
    match next_frame(rx) {
        Some(ServerMessage::Delivery { id, payload, .. }) => (id, payload),
        other => panic!("expected a delivery frame, got {other:?}"),
    }
}

#[test]
fn create_queue_is_idempotent_for_identical_parameters() {
    let (broker, _dir) = test_broker();
    let first = broker.create_queue("orders", 8).unwrap();
    let second = broker.create_queue("orders", 8).unwrap();
    assert_eq!(first.name, second.name);
    assert_eq!(second.buffer_size, 8);
}

#[test]
fn create_queue_rejects_conflicting_buffer_size() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();
    assert!(matches!(
        broker.create_queue("orders", 16),
        Err(BrokerError::QueueAlreadyExists(_))
    ));
}

#[test]
fn add_assigns_strictly_increasing_ids() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 16).unwrap();
    let a = broker.add("orders", "m1".into()).unwrap();
    let b = broker.add("orders", "m2".into()).unwrap();
    let c = broker.add("metrics", "m3".into()).unwrap();
    assert!(a < b && b < c, "ids must increase across all queues");
}

#[test]
fn add_auto_creates_queues_by_default() {
    let (broker, _dir) = test_broker();
    broker.add("implicit", "m1".into()).unwrap();
    let state = broker.get_state();
    assert_eq!(state.queues.len(), 1);
    assert_eq!(state.queues[0].name, "implicit");
    assert_eq!(
        state.queues[0].buffer_size,
        BrokerOptions::default().default_buffer_size
    );
}

#[test]
fn add_fails_on_unknown_queue_when_auto_create_is_off() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_in(
        &dir,
        BrokerOptions {
            auto_create_queues: false,
            ..BrokerOptions::default()
        },
    );
    assert!(matches!(
        broker.add("nope", "m1".into()),
        Err(BrokerError::QueueNotFound(_))
    ));
}

#[test]
fn subscribe_requires_an_existing_queue() {
    let (broker, _dir) = test_broker();
    let (tx, _rx) = channel();
    assert!(matches!(
        broker.subscribe("nope", None, tx),
        Err(BrokerError::QueueNotFound(_))
    ));
}

#[test]
fn orders_scenario_from_end_to_end() {
    // createQueue("orders", 2); two adds fill it; the third is rejected
    // until acknowledgments free capacity.
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 2).unwrap();

    assert_eq!(broker.add("orders", "m1".into()).unwrap(), 1);
    assert_eq!(broker.add("orders", "m2".into()).unwrap(), 2);
    assert!(matches!(
        broker.add("orders", "m3".into()),
        Err(BrokerError::QueueFull(_))
    ));

    let (tx, mut rx) = channel();
    let consumer = broker.subscribe("orders", None, tx).unwrap();
    let (id, payload) = expect_delivery(&mut rx);
    assert_eq!((id, payload.as_str()), (1, "m1"));

    // Delivery alone frees nothing; the queue still holds two
    // unacknowledged messages.
    assert!(matches!(
        broker.add("orders", "m3".into()),
        Err(BrokerError::QueueFull(_))
    ));

    broker.acknowledge("orders", &consumer).unwrap();
    let (id, payload) = expect_delivery(&mut rx);
    assert_eq!((id, payload.as_str()), (2, "m2"));

    broker.acknowledge("orders", &consumer).unwrap();
    assert_eq!(broker.add("orders", "m3".into()).unwrap(), 3);
    let (id, payload) = expect_delivery(&mut rx);
    assert_eq!((id, payload.as_str()), (3, "m3"));
}

#[test]
fn delivery_order_matches_enqueue_order() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 16).unwrap();
    for i in 1..=5 {
        broker.add("orders", format!("m{i}")).unwrap();
    }

    let (tx, mut rx) = channel();
    let consumer = broker.subscribe("orders", None, tx).unwrap();

    let mut received = Vec::new();
    for _ in 0..5 {
        let (_, payload) = expect_delivery(&mut rx);
        received.push(payload);
        broker.acknowledge("orders", &consumer).unwrap();
    }
    assert_eq!(received, vec!["m1", "m2", "m3", "m4", "m5"]);
}

#[test]
fn at_most_one_outstanding_message_per_consumer() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 16).unwrap();
    for i in 1..=3 {
        broker.add("orders", format!("m{i}")).unwrap();
    }

    let (tx, mut rx) = channel();
    let consumer = broker.subscribe("orders", None, tx).unwrap();

    // Exactly one delivery until the ack, no matter how many are pending.
    assert!(matches!(
        next_frame(&mut rx),
        Some(ServerMessage::Delivery { id: 1, .. })
    ));
    assert!(next_frame(&mut rx).is_none());

    broker.acknowledge("orders", &consumer).unwrap();
    assert!(matches!(
        next_frame(&mut rx),
        Some(ServerMessage::Delivery { id: 2, .. })
    ));
    assert!(next_frame(&mut rx).is_none());
}

#[test]
fn subscribe_to_empty_queue_waits_for_the_next_add() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();

    let (tx, mut rx) = channel();
    broker.subscribe("orders", Some("c1".into()), tx).unwrap();
    assert!(next_frame(&mut rx).is_none(), "nothing to deliver yet");

    // The add pushes to the idle consumer without any polling.
    broker.add("orders", "m1".into()).unwrap();
    let (_, payload) = expect_delivery(&mut rx);
    assert_eq!(payload, "m1");
}

#[test]
fn ack_without_outstanding_message_is_a_noop() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();
    broker.add("orders", "m1".into()).unwrap();

    // Unknown consumer.
    broker.acknowledge("orders", "ghost").unwrap();

    // Known consumer, nothing outstanding (already idle after its ack).
    let (tx, mut rx) = channel();
    let consumer = broker.subscribe("orders", None, tx).unwrap();
    expect_delivery(&mut rx);
    broker.acknowledge("orders", &consumer).unwrap();
    broker.acknowledge("orders", &consumer).unwrap();

    // Wrong queue name for a bound consumer.
    broker.create_queue("audit", 8).unwrap();
    broker.acknowledge("audit", &consumer).unwrap();

    // Queue state is untouched by any of the above.
    let state = broker.get_state();
    let orders = state.queues.iter().find(|q| q.name == "orders").unwrap();
    assert_eq!(orders.pending, 0);
    assert_eq!(orders.in_flight, 0);
}

#[test]
fn duplicate_consumer_id_on_a_live_connection_is_rejected() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();

    let (tx, _rx) = channel();
    broker
        .subscribe("orders", Some("c1".into()), tx)
        .unwrap();

    let (tx2, _rx2) = channel();
    assert!(matches!(
        broker.subscribe("orders", Some("c1".into()), tx2),
        Err(BrokerError::ConsumerAlreadyConnected(_))
    ));
}

#[test]
fn disconnect_releases_the_outstanding_message_for_redelivery() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();
    broker.add("orders", "m1".into()).unwrap();
    broker.add("orders", "m2".into()).unwrap();

    let (tx, mut rx) = channel();
    broker.subscribe("orders", Some("c1".into()), tx).unwrap();
    expect_delivery(&mut rx);

    broker.handle_disconnect("c1");
    let state = broker.get_state();
    assert_eq!(state.queues[0].pending, 2, "m1 returned to the head");
    assert_eq!(state.queues[0].in_flight, 0);

    // The same consumer id reconnects and receives m1 again, in order.
    let (tx2, mut rx2) = channel();
    let consumer = broker
        .subscribe("orders", Some("c1".into()), tx2)
        .unwrap();
    assert_eq!(consumer, "c1");
    let (_, payload) = expect_delivery(&mut rx2);
    assert_eq!(payload, "m1");
    broker.acknowledge("orders", "c1").unwrap();
    let (_, payload) = expect_delivery(&mut rx2);
    assert_eq!(payload, "m2");
}

#[test]
fn released_message_goes_to_another_idle_consumer() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();
    broker.add("orders", "m1".into()).unwrap();

    let (tx1, mut rx1) = channel();
    broker.subscribe("orders", Some("c1".into()), tx1).unwrap();
    expect_delivery(&mut rx1);

    let (tx2, mut rx2) = channel();
    broker.subscribe("orders", Some("c2".into()), tx2).unwrap();
    assert!(next_frame(&mut rx2).is_none(), "m1 is outstanding at c1");

    broker.handle_disconnect("c1");
    let (_, payload) = expect_delivery(&mut rx2);
    assert_eq!(payload, "m1");
}

#[test]
fn delivery_to_a_dead_channel_rolls_back() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 8).unwrap();

    let (tx, rx) = channel();
    broker.subscribe("orders", Some("c1".into()), tx).unwrap();
    drop(rx);

    // The add succeeds; the failed push leaves the message pending and the
    // consumer marked disconnected.
    broker.add("orders", "m1".into()).unwrap();
    let state = broker.get_state();
    assert_eq!(state.queues[0].pending, 1);
    assert_eq!(state.queues[0].in_flight, 0);

    let (tx2, mut rx2) = channel();
    broker.subscribe("orders", Some("c2".into()), tx2).unwrap();
    let (_, payload) = expect_delivery(&mut rx2);
    assert_eq!(payload, "m1");
}

#[test]
fn restart_recovers_unacknowledged_messages_in_order() {
    let dir = tempfile::tempdir().unwrap();

    // Enqueue five, acknowledge the first two, then "crash".
    {
        let broker = broker_in(&dir, BrokerOptions::default());
        broker.create_queue("orders", 8).unwrap();
        for i in 1..=5 {
            broker.add("orders", format!("m{i}")).unwrap();
        }
        let (tx, mut rx) = channel();
        let consumer = broker.subscribe("orders", None, tx).unwrap();
        for _ in 0..2 {
            expect_delivery(&mut rx);
            broker.acknowledge("orders", &consumer).unwrap();
        }
        // m3 is outstanding but never acked; it must survive too.
    }

    let broker = broker_in(&dir, BrokerOptions::default());
    let state = broker.get_state();
    let orders = state.queues.iter().find(|q| q.name == "orders").unwrap();
    assert_eq!(orders.pending, 3, "exactly N-K messages recovered");
    assert_eq!(orders.buffer_size, 8, "definition recovered as declared");

    let (tx, mut rx) = channel();
    let consumer = broker.subscribe("orders", None, tx).unwrap();
    let mut payloads = Vec::new();
    for _ in 0..3 {
        let (_, payload) = expect_delivery(&mut rx);
        payloads.push(payload);
        broker.acknowledge("orders", &consumer).unwrap();
    }
    assert_eq!(payloads, vec!["m3", "m4", "m5"]);
}

#[test]
fn ids_keep_increasing_across_restarts() {
    let dir = tempfile::tempdir().unwrap();

    let max_before = {
        let broker = broker_in(&dir, BrokerOptions::default());
        broker.create_queue("orders", 8).unwrap();
        broker.add("orders", "m1".into()).unwrap();
        broker.add("orders", "m2".into()).unwrap()
    };

    let broker = broker_in(&dir, BrokerOptions::default());
    let after = broker.add("orders", "m3".into()).unwrap();
    assert!(after > max_before);
}

#[test]
fn ids_keep_increasing_even_when_every_message_was_acked() {
    let dir = tempfile::tempdir().unwrap();

    let max_before = {
        let broker = broker_in(&dir, BrokerOptions::default());
        broker.create_queue("orders", 8).unwrap();
        let id = broker.add("orders", "m1".into()).unwrap();
        let (tx, mut rx) = channel();
        let consumer = broker.subscribe("orders", None, tx).unwrap();
        expect_delivery(&mut rx);
        broker.acknowledge("orders", &consumer).unwrap();
        id
    };

    let broker = broker_in(&dir, BrokerOptions::default());
    let after = broker.add("orders", "m2".into()).unwrap();
    assert!(after > max_before, "{after} must exceed {max_before}");
}

#[test]
fn restored_queue_still_enforces_its_capacity() {
    let dir = tempfile::tempdir().unwrap();

    {
        let broker = broker_in(&dir, BrokerOptions::default());
        broker.create_queue("orders", 2).unwrap();
        broker.add("orders", "m1".into()).unwrap();
        broker.add("orders", "m2".into()).unwrap();
    }

    let broker = broker_in(&dir, BrokerOptions::default());
    assert!(matches!(
        broker.add("orders", "m3".into()),
        Err(BrokerError::QueueFull(_))
    ));
}

#[test]
fn get_state_reports_queues_consumers_and_depths() {
    let (broker, _dir) = test_broker();
    broker.create_queue("orders", 4).unwrap();
    broker.create_queue("audit", 16).unwrap();
    broker.add("orders", "m1".into()).unwrap();
    broker.add("orders", "m2".into()).unwrap();

    let (tx, mut rx) = channel();
    broker.subscribe("orders", Some("c1".into()), tx).unwrap();
    expect_delivery(&mut rx);

    let state = broker.get_state();
    assert_eq!(state.queues.len(), 2);
    // Snapshot order is deterministic (sorted by name).
    assert_eq!(state.queues[0].name, "audit");
    assert_eq!(state.queues[1].name, "orders");

    let orders = &state.queues[1];
    assert_eq!(orders.pending, 1);
    assert_eq!(orders.in_flight, 1);
    assert_eq!(orders.consumers.len(), 1);
    assert_eq!(orders.consumers[0].consumer_id, "c1");

    let encoded = serde_json::to_value(&state).unwrap();
    assert_eq!(
        encoded["queues"][1]["consumers"][0]["state"],
        "awaiting_ack"
    );
}

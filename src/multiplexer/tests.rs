use super::engine::Link;
use super::topic::Topic;
use super::{Callback, Message, Multiplexer, SubscribeOutcome};
use crate::transport::TransportHandle;
use crate::transport::mock::{RecordingLink, WireOp};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn noop() -> Callback {
    Callback::new(|_| {})
}

fn counting() -> (Callback, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let callback = Callback::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (callback, hits)
}

fn live() -> (Arc<RecordingLink>, Link) {
    let recording = RecordingLink::new();
    let link: Link = recording.clone();
    (recording, link)
}

#[test]
fn test_topic_subscribe_is_idempotent() {
    let mut topic = Topic::new("/topics/room-1");
    assert_eq!(topic.name, "/topics/room-1");
    let cb = noop();
    assert!(topic.subscribe(cb.clone()));
    assert!(!topic.subscribe(cb.clone()));
    assert_eq!(topic.subscribers.len(), 1);

    assert!(topic.unsubscribe(&cb));
    assert!(!topic.unsubscribe(&cb));
    assert!(topic.is_empty());
}

#[test]
fn test_callback_identity() {
    let a = noop();
    let b = noop();
    assert_eq!(a, a.clone());
    assert_ne!(a, b);
}

#[test]
fn test_message_decode_into_type() {
    #[derive(serde::Deserialize)]
    struct Chat {
        text: String,
    }

    let msg = Message::new("/topics/room-1", json!({"text": "hi"}));
    let chat: Chat = msg.decode().unwrap();
    assert_eq!(chat.text, "hi");
    assert!(msg.timestamp > 0);
}

#[test]
fn test_one_wire_subscription_per_topic() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();

    let a = noop();
    let b = noop();
    assert_eq!(
        mux.subscribe("/topics/room-1", a.clone(), Some(&link)),
        SubscribeOutcome::Attached
    );
    assert_eq!(
        mux.subscribe("/topics/room-1", b.clone(), Some(&link)),
        SubscribeOutcome::Reused
    );
    assert_eq!(mux.wire_count(), 1);
    assert_eq!(recording.active_for("/topics/room-1"), 1);

    assert!(mux.unsubscribe("/topics/room-1", &a, Some(&link)));
    assert_eq!(mux.wire_count(), 1);
    assert_eq!(recording.active_for("/topics/room-1"), 1);

    assert!(mux.unsubscribe("/topics/room-1", &b, Some(&link)));
    assert_eq!(mux.wire_count(), 0);
    assert_eq!(recording.active_for("/topics/room-1"), 0);
    assert_eq!(mux.topic_count(), 0);
}

#[test]
fn test_wire_count_tracks_non_empty_sets_over_churn() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    let callbacks: Vec<Callback> = (0..4).map(|_| noop()).collect();
    let topics = ["/topics/a", "/topics/b", "/topics/c"];

    // interleave subscribes and unsubscribes across topics
    for (i, cb) in callbacks.iter().enumerate() {
        for topic in &topics[..=(i % topics.len())] {
            mux.subscribe(topic, cb.clone(), Some(&link));
        }
        if i % 2 == 1 {
            mux.unsubscribe(topics[0], &callbacks[i - 1], Some(&link));
        }

        let non_empty = topics
            .iter()
            .filter(|t| mux.subscriber_count(t) > 0)
            .count();
        assert_eq!(mux.wire_count(), non_empty);
        for topic in &topics {
            let expected = usize::from(mux.subscriber_count(topic) > 0);
            assert_eq!(recording.active_for(topic), expected);
        }
    }
}

#[test]
fn test_unsubscribe_unknown_callback_is_noop() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    let a = noop();
    mux.subscribe("/topics/room-1", a, Some(&link));

    assert!(!mux.unsubscribe("/topics/room-1", &noop(), Some(&link)));
    assert!(!mux.unsubscribe("/topics/other", &noop(), Some(&link)));
    assert_eq!(mux.wire_count(), 1);
    assert_eq!(recording.subscribe_count(), 1);
}

#[test]
fn test_subscribe_while_disconnected_queues() {
    let mut mux = Multiplexer::new();
    let a = noop();
    assert_eq!(
        mux.subscribe("/topics/room-1", a.clone(), None),
        SubscribeOutcome::Queued
    );
    // same callback twice: one intent
    mux.subscribe("/topics/room-1", a, None);

    assert_eq!(mux.pending().len(), 1);
    assert_eq!(mux.subscriber_count("/topics/room-1"), 1);
    assert_eq!(mux.wire_count(), 0);
}

#[test]
fn test_replay_groups_intents_by_topic() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    mux.subscribe("/topics/room-1", noop(), None);
    mux.subscribe("/topics/room-1", noop(), None);
    mux.subscribe("/topics/room-2", noop(), None);
    assert_eq!(mux.pending().len(), 3);

    assert_eq!(mux.replay(&link), 2);
    assert!(mux.pending().is_empty());
    assert_eq!(recording.active_for("/topics/room-1"), 1);
    assert_eq!(recording.active_for("/topics/room-2"), 1);

    // nothing left to replay the second time
    assert_eq!(mux.replay(&link), 0);
    assert_eq!(recording.subscribe_count(), 2);
}

#[test]
fn test_unsubscribe_before_connect_drops_intent() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    let a = noop();
    mux.subscribe("/topics/room-1", a.clone(), None);
    mux.unsubscribe("/topics/room-1", &a, None);

    assert!(mux.pending().is_empty());
    assert_eq!(mux.replay(&link), 0);
    assert_eq!(recording.subscribe_count(), 0);
}

#[test]
fn test_failed_wire_write_is_queued_for_next_connect() {
    let (recording, link) = live();
    recording.close();
    let mut mux = Multiplexer::new();

    assert_eq!(
        mux.subscribe("/topics/room-1", noop(), Some(&link)),
        SubscribeOutcome::Queued
    );
    assert_eq!(mux.wire_count(), 0);

    let (fresh, fresh_link) = live();
    assert_eq!(mux.replay(&fresh_link), 1);
    assert_eq!(fresh.active_for("/topics/room-1"), 1);
}

#[test]
fn test_unsubscribe_all_by_channel() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    mux.subscribe("/topics/channel-42/messages", noop(), Some(&link));
    mux.subscribe("/topics/channel-42/messages", noop(), Some(&link));
    mux.subscribe("/topics/channel-42/typing", noop(), Some(&link));
    mux.subscribe("/topics/channel-7/messages", noop(), Some(&link));

    let torn_down = mux.unsubscribe_all(|t| t.contains("channel-42"), Some(&link));
    assert_eq!(torn_down, 2);
    assert_eq!(mux.wire_count(), 1);
    assert_eq!(mux.subscriber_count("/topics/channel-42/messages"), 0);
    assert_eq!(recording.active().len(), 1);
    assert_eq!(recording.active_for("/topics/channel-7/messages"), 1);
}

#[test]
fn test_routes_follow_wire_subscriptions() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    let a = noop();
    mux.subscribe("/topics/room-1", a.clone(), Some(&link));

    let id = mux.wire("/topics/room-1").unwrap().id.clone();
    assert_eq!(recording.active(), vec![(id.clone(), "/topics/room-1".to_string())]);
    assert_eq!(mux.route(&id), Some("/topics/room-1"));
    assert_eq!(mux.resolve("", "/topics/room-1").as_deref(), Some("/topics/room-1"));

    mux.unsubscribe("/topics/room-1", &a, Some(&link));
    assert_eq!(mux.route(&id), None);
    assert_eq!(mux.resolve(&id, "/topics/room-1"), None);
}

#[test]
fn test_listeners_reflect_live_set() {
    let (_recording, link) = live();
    let mut mux = Multiplexer::new();
    let (a, a_hits) = counting();
    let (b, b_hits) = counting();
    mux.subscribe("/topics/room-1", a.clone(), Some(&link));
    mux.subscribe("/topics/room-1", b, Some(&link));
    mux.unsubscribe("/topics/room-1", &a, Some(&link));

    let msg = Message::new("/topics/room-1", json!({}));
    for cb in mux.listeners("/topics/room-1") {
        cb.call(&msg);
    }
    assert_eq!(a_hits.load(Ordering::SeqCst), 0);
    assert_eq!(b_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_requeue_after_connection_loss() {
    let (_old, old_link) = live();
    let mut mux = Multiplexer::new();
    mux.subscribe("/topics/room-1", noop(), Some(&old_link));
    mux.subscribe("/topics/room-1", noop(), Some(&old_link));
    mux.subscribe("/topics/room-2", noop(), Some(&old_link));

    mux.requeue();
    assert_eq!(mux.wire_count(), 0);
    assert_eq!(mux.pending().len(), 3);
    assert_eq!(mux.subscriber_count("/topics/room-1"), 2);

    let (fresh, fresh_link) = live();
    assert_eq!(mux.replay(&fresh_link), 2);
    assert_eq!(fresh.active().len(), 2);
}

#[test]
fn test_disconnect_all_unsubscribes_and_clears() {
    let (recording, link) = live();
    let mut mux = Multiplexer::new();
    mux.subscribe("/topics/room-1", noop(), Some(&link));
    mux.subscribe("/topics/room-2", noop(), Some(&link));
    mux.subscribe("/topics/room-3", noop(), None);

    mux.disconnect_all(Some(&link));
    assert!(mux.is_empty());
    assert!(recording.active().is_empty());
    let unsubscribes = recording
        .ops()
        .into_iter()
        .filter(|op| matches!(op, WireOp::Unsubscribe { .. }))
        .count();
    assert_eq!(unsubscribes, 2);

    // idempotent
    mux.disconnect_all(Some(&link));
    assert!(mux.is_empty());
}

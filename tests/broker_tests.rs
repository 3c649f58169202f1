use std::sync::Arc;
use std::time::Duration;

use fanout::broker::history::History;
use fanout::broker::subscriber::{EnqueueResult, SubscriberPipeline};
use fanout::broker::topic::{PublishPolicy, Topic};
use fanout::protocol::{Envelope, EnvelopeKind};

mod helpers;
use helpers::msg;

#[cfg(test)]
mod broker_tests {
    use super::*;

    // =====================================================================
    // 1. HISTORY (ring semantics + snapshot clamping)
    // =====================================================================

    mod history {
        use super::*;

        #[test]
        fn test_snapshot_clamps_and_orders() {
            let history = History::new(10);
            for i in 1..=5 {
                history.append(msg(&format!("m{}", i)));
            }

            let last3: Vec<String> = history.last_n(3).into_iter().map(|m| m.id).collect();
            assert_eq!(last3, vec!["m3", "m4", "m5"], "most recent three, oldest first");

            let all: Vec<String> = history.last_n(100).into_iter().map(|m| m.id).collect();
            assert_eq!(all.len(), 5, "snapshot clamps to size");
            assert_eq!(all.first().map(String::as_str), Some("m1"));

            assert!(history.last_n(0).is_empty());
            assert!(history.last_n(-3).is_empty());
        }

        #[test]
        fn test_ring_overwrites_oldest() {
            let history = History::new(3);
            for i in 1..=5 {
                history.append(msg(&format!("m{}", i)));
            }

            assert_eq!(history.size(), 3);
            let ids: Vec<String> = history.last_n(10).into_iter().map(|m| m.id).collect();
            assert_eq!(ids, vec!["m3", "m4", "m5"], "oldest two overwritten");
        }

        #[test]
        fn test_zero_capacity_falls_back_to_default() {
            let history = History::new(0);
            assert_eq!(history.capacity(), 100);
        }

        #[test]
        fn test_empty_buffer_empty_snapshot() {
            let history = History::new(4);
            assert!(history.is_empty());
            assert!(history.last_n(4).is_empty());
        }
    }

    // =====================================================================
    // 2. SUBSCRIBER PIPELINE (bounded queue + lifecycle)
    // =====================================================================

    mod pipeline {
        use super::*;

        fn envelope(id: &str) -> Envelope {
            Envelope::message("t", msg(id))
        }

        #[test]
        fn test_zero_capacity_falls_back_to_default() {
            let pipe = SubscriberPipeline::new("c1", 0);
            assert_eq!(pipe.queue_capacity(), 100);
        }

        #[test]
        fn test_accepts_until_capacity() {
            let pipe = SubscriberPipeline::new("c1", 2);
            assert_eq!(pipe.try_enqueue(envelope("m1")), EnqueueResult::Accepted);
            assert_eq!(pipe.try_enqueue(envelope("m2")), EnqueueResult::Accepted);
            assert_eq!(pipe.try_enqueue(envelope("m3")), EnqueueResult::Rejected);
            assert_eq!(pipe.queue_len(), 2);
        }

        #[test]
        fn test_drain_oldest_frees_one_slot() {
            let pipe = SubscriberPipeline::new("c1", 2);
            pipe.try_enqueue(envelope("m1"));
            pipe.try_enqueue(envelope("m2"));

            let drained = pipe.drain_oldest().expect("queue not empty");
            assert_eq!(drained.message.unwrap().id, "m1");
            assert_eq!(pipe.try_enqueue(envelope("m3")), EnqueueResult::Accepted);
        }

        #[tokio::test]
        async fn test_recv_preserves_enqueue_order() {
            let pipe = SubscriberPipeline::new("c1", 10);
            pipe.try_enqueue(envelope("m1"));
            pipe.try_enqueue(envelope("m2"));

            assert_eq!(pipe.recv().await.unwrap().message.unwrap().id, "m1");
            assert_eq!(pipe.recv().await.unwrap().message.unwrap().id, "m2");
        }

        #[tokio::test]
        async fn test_recv_drains_remaining_after_close() {
            let pipe = SubscriberPipeline::new("c1", 10);
            pipe.try_enqueue(envelope("m1"));
            pipe.close();

            // Queued envelopes survive closure, then the stream ends.
            assert_eq!(pipe.recv().await.unwrap().message.unwrap().id, "m1");
            assert!(pipe.recv().await.is_none());
        }

        #[test]
        fn test_enqueue_after_close_rejected() {
            let pipe = SubscriberPipeline::new("c1", 10);
            pipe.close();
            assert_eq!(pipe.try_enqueue(envelope("m1")), EnqueueResult::Rejected);
        }

        #[tokio::test]
        async fn test_close_is_idempotent_and_never_blocks() {
            let pipe = Arc::new(SubscriberPipeline::new("c1", 4));
            pipe.try_enqueue(envelope("m1"));

            let closer = pipe.clone();
            let result = tokio::time::timeout(Duration::from_secs(1), async move {
                closer.close();
                closer.close();
            })
            .await;
            assert!(result.is_ok(), "double close must not deadlock");
            assert!(!pipe.is_active());
        }

        #[tokio::test]
        async fn test_consumer_acknowledges_closed_state() {
            let pipe = Arc::new(SubscriberPipeline::new("c1", 4));
            pipe.try_enqueue(envelope("m1"));

            let consumer = pipe.clone();
            tokio::spawn(async move {
                while consumer.recv().await.is_some() {}
                consumer.mark_closed();
            });

            pipe.close();
            tokio::time::timeout(Duration::from_secs(1), pipe.closed())
                .await
                .expect("consumer should acknowledge closure");
            assert!(pipe.is_closed());
        }
    }

    // =====================================================================
    // 3. TOPIC FAN-OUT (ordering + backpressure policies)
    // =====================================================================

    mod fan_out {
        use super::*;

        #[test]
        fn test_publish_without_subscribers() {
            let topic = Topic::new("t", 10);
            let (delivered, dropped) = topic.publish(msg("m1"), PublishPolicy::DropOldest);

            assert_eq!((delivered, dropped), (0, 0));
            assert_eq!(topic.message_count(), 1);
            assert_eq!(topic.last_n(1).len(), 1, "history records even with no subscribers");
        }

        #[test]
        fn test_attach_replaces_and_closes_prior() {
            let topic = Topic::new("t", 10);
            let first = Arc::new(SubscriberPipeline::new("c1", 4));
            let second = Arc::new(SubscriberPipeline::new("c1", 4));

            topic.attach(first.clone());
            topic.attach(second.clone());

            assert!(!first.is_active(), "replaced pipeline is closed");
            assert!(second.is_active());
            assert_eq!(topic.subscriber_count(), 1);
            assert!(topic.get_subscriber("c1").unwrap().is_active());
        }

        #[test]
        fn test_detach_reports_presence() {
            let topic = Topic::new("t", 10);
            let pipe = Arc::new(SubscriberPipeline::new("c1", 4));
            topic.attach(pipe.clone());

            assert!(topic.detach("c1"));
            assert!(!pipe.is_active());
            assert!(!topic.detach("c1"), "second detach finds nothing");
        }

        #[tokio::test]
        async fn test_single_subscriber_receives_in_publish_order() {
            let topic = Topic::new("t", 100);
            let pipe = Arc::new(SubscriberPipeline::new("c1", 100));
            topic.attach(pipe.clone());

            for i in 1..=10 {
                let (delivered, dropped) =
                    topic.publish(msg(&format!("m{}", i)), PublishPolicy::DropOldest);
                assert_eq!((delivered, dropped), (1, 0));
            }

            for i in 1..=10 {
                let env = pipe.recv().await.unwrap();
                assert_eq!(env.kind, EnvelopeKind::Message);
                assert_eq!(env.topic.as_deref(), Some("t"));
                assert_eq!(env.message.unwrap().id, format!("m{}", i));
            }
        }

        #[tokio::test]
        async fn test_drop_oldest_keeps_newest_in_order() {
            let topic = Topic::new("b", 100);
            // Paused consumer: nothing drains the queue while we publish.
            let pipe = Arc::new(SubscriberPipeline::new("c1", 2));
            topic.attach(pipe.clone());

            for i in 1..=4 {
                topic.publish(msg(&format!("m{}", i)), PublishPolicy::DropOldest);
            }

            // m1 and m2 were displaced; one drop counted per overflow event.
            assert_eq!(topic.dropped_count(), 2);
            assert_eq!(pipe.recv().await.unwrap().message.unwrap().id, "m3");
            assert_eq!(pipe.recv().await.unwrap().message.unwrap().id, "m4");
        }

        #[test]
        fn test_drop_oldest_retry_counts_as_delivered() {
            let topic = Topic::new("b", 100);
            let pipe = Arc::new(SubscriberPipeline::new("c1", 1));
            topic.attach(pipe);

            assert_eq!(topic.publish(msg("m1"), PublishPolicy::DropOldest), (1, 0));
            // Overflow: m1 is displaced, the retry lands m2.
            assert_eq!(topic.publish(msg("m2"), PublishPolicy::DropOldest), (1, 0));
            assert_eq!(topic.dropped_count(), 1);
        }

        #[tokio::test]
        async fn test_disconnect_policy_removes_subscriber() {
            let topic = Topic::new("b", 100);
            let pipe = Arc::new(SubscriberPipeline::new("c1", 1));
            topic.attach(pipe.clone());

            assert_eq!(topic.publish(msg("m1"), PublishPolicy::Disconnect), (1, 0));
            assert_eq!(topic.publish(msg("m2"), PublishPolicy::Disconnect), (0, 1));

            assert!(!pipe.is_active());
            assert_eq!(topic.subscriber_count(), 0);
            assert_eq!(topic.dropped_count(), 1);

            // The subscriber sees at most m1 plus at most one overflow error.
            let mut messages = 0;
            let mut overflow_errors = 0;
            while let Some(env) = pipe.recv().await {
                match env.kind {
                    EnvelopeKind::Message => messages += 1,
                    EnvelopeKind::Error => {
                        assert_eq!(env.error.unwrap().code, "BUFFER_OVERFLOW");
                        overflow_errors += 1;
                    }
                    other => panic!("unexpected envelope kind {:?}", other),
                }
            }
            assert!(messages <= 1);
            assert!(overflow_errors <= 1);
        }

        #[test]
        fn test_topic_close_is_idempotent() {
            let topic = Topic::new("t", 10);
            let a = Arc::new(SubscriberPipeline::new("c1", 4));
            let b = Arc::new(SubscriberPipeline::new("c2", 4));
            topic.attach(a.clone());
            topic.attach(b.clone());

            topic.close();
            topic.close();

            assert!(!a.is_active());
            assert!(!b.is_active());
            assert_eq!(topic.subscriber_count(), 0);
        }

        #[tokio::test]
        async fn test_concurrent_publish_and_detach() {
            let topic = Arc::new(Topic::new("t", 100));
            let pipe = Arc::new(SubscriberPipeline::new("c1", 100));
            topic.attach(pipe.clone());

            let drainer = pipe.clone();
            tokio::spawn(async move { while drainer.recv().await.is_some() {} });

            let topic_clone = topic.clone();
            let detacher = tokio::spawn(async move {
                topic_clone.detach("c1");
            });

            for i in 0..100 {
                topic.publish(msg(&format!("m{}", i)), PublishPolicy::DropOldest);
            }

            detacher.await.unwrap();
            assert_eq!(topic.subscriber_count(), 0);
        }
    }
}

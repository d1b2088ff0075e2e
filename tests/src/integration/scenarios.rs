//! # Dispatch Scenarios
//!
//! End-to-end flows through routing, correlation and the encryption context
//! store:
//!
//! 1. **Routed reset**: a station reachable only through a hub
//! 2. **Counters**: concurrent encryptions for one station never share a counter
//! 3. **Completion**: duplicate replies and timeouts reach the caller once

#[cfg(test)]
mod tests {
    use crate::harness::{call_payload, Harness};
    use csms_crypto::{ContextMaterial, SecretKey};
    use csms_dispatch::operations::{Reset, ResetStatus, ResetType};
    use csms_dispatch::{CsmsConfig, DispatchError, Egress, RequestOptions};
    use csms_types::{Frame, PeerId, SealedPayload};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn p(id: &str) -> PeerId {
        PeerId::new(id)
    }

    fn context(counter: u64) -> ContextMaterial {
        ContextMaterial {
            encrypt_key: SecretKey::from_bytes([0x42; 32]),
            decrypt_key: SecretKey::from_bytes([0x24; 32]),
            nonce: 1,
            counter,
        }
    }

    // =============================================================================
    // ROUTING
    // =============================================================================

    #[tokio::test]
    async fn test_reset_to_station_behind_hub() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.add_static_route(p("CS-17"), p("HUB-1"));
        let mut hub = h.connect("HUB-1").await;

        assert_eq!(
            h.csms.resolve(&p("CS-17")).unwrap(),
            Egress::ViaHub {
                hub: p("HUB-1"),
                destination: p("CS-17")
            }
        );

        let call = h
            .csms
            .send(
                &Reset::new("CS-17", ResetType::Immediate),
                RequestOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(h.csms.correlator().pending_count(), 1);

        // The hub receives the frame still addressed to the station.
        let frame = hub.recv().await.unwrap();
        assert_eq!(frame.destination, p("CS-17"));
        assert_eq!(&frame.request_id, call.request_id());
        assert_eq!(call_payload(&frame), &json!({"type": "Immediate"}));

        // The hub relays the station's answer back.
        hub.deliver(Frame::result_for(&frame, json!({"status": "Accepted"})))
            .await
            .unwrap();

        let response = call.response().await.unwrap();
        assert_eq!(response.status, ResetStatus::Accepted);
        assert_eq!(h.csms.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_route_removal_is_keyed_by_next_hop() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.add_static_route(p("CS-17"), p("HUB-1"));

        assert!(!h.csms.remove_static_route(&p("CS-17"), &p("HUB-2")));
        assert_eq!(h.csms.resolve(&p("CS-17")).unwrap().peer(), &p("HUB-1"));

        assert!(h.csms.remove_static_route(&p("CS-17"), &p("HUB-1")));
        assert_eq!(
            h.csms.resolve(&p("CS-17")),
            Err(DispatchError::NoRouteFound {
                destination: p("CS-17")
            })
        );
    }

    #[tokio::test]
    async fn test_direct_connection_wins_over_route() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.add_static_route(p("CS-17"), p("HUB-1"));
        let mut hub = h.connect("HUB-1").await;
        let mut station = h.connect("CS-17").await;

        let _call = h
            .csms
            .send(&Reset::new("CS-17", ResetType::OnIdle), RequestOptions::default())
            .await
            .unwrap();

        assert!(station.recv().await.is_some());
        assert!(hub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_routes_from_config_are_installed() {
        let config = CsmsConfig::from_toml_str(
            r#"
            [[static_routes]]
            destination = "CS-17"
            next_hop = "HUB-1"
            "#,
        )
        .unwrap();
        let h = Harness::start(config).await;
        let _hub = h.connect("HUB-1").await;
        assert_eq!(h.csms.resolve(&p("CS-17")).unwrap().peer(), &p("HUB-1"));
    }

    // =============================================================================
    // COUNTERS
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_concurrent_counters_are_distinct() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms
            .encryption_contexts()
            .configure(p("CS-9"), None, context(0));

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let csms = h.csms.clone();
                tokio::spawn(async move {
                    csms.encryption_contexts().next_counter(&p("CS-9"), None)
                })
            })
            .collect();

        let mut counters = Vec::new();
        for task in tasks {
            counters.push(task.await.unwrap().unwrap());
        }
        counters.sort_unstable();
        assert_eq!(counters, vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_encrypted_sends_consume_distinct_counters() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms
            .encryption_contexts()
            .configure(p("CS-9"), None, context(0));
        let mut station = h.connect("CS-9").await;

        let sends: Vec<_> = (0..3)
            .map(|_| {
                let csms = h.csms.clone();
                tokio::spawn(async move {
                    csms.send(
                        &Reset::new("CS-9", ResetType::Immediate),
                        RequestOptions::default().encrypted(None),
                    )
                    .await
                    .map(|call| call.request_id().clone())
                })
            })
            .collect();
        for sent in futures::future::join_all(sends).await {
            sent.unwrap().unwrap();
        }

        let mut counters = HashSet::new();
        for _ in 0..3 {
            let frame = station.recv().await.unwrap();
            let sealed = SealedPayload::from_value(call_payload(&frame))
                .unwrap()
                .unwrap();
            counters.insert(sealed.counter);
        }
        assert_eq!(counters, HashSet::from([0, 1, 2]));
    }

    #[tokio::test]
    async fn test_counters_are_independent_per_slot() {
        let h = Harness::start(CsmsConfig::default()).await;
        let keys = h.csms.encryption_contexts();
        keys.configure(p("CS-9"), None, context(0));
        keys.configure(p("CS-9"), Some(1), context(100));

        assert_eq!(keys.next_counter(&p("CS-9"), None).unwrap(), 0);
        assert_eq!(keys.next_counter(&p("CS-9"), Some(1)).unwrap(), 100);
        assert_eq!(keys.next_counter(&p("CS-9"), None).unwrap(), 1);
        assert!(keys.next_counter(&p("CS-10"), None).is_err());
    }

    // =============================================================================
    // COMPLETION
    // =============================================================================

    #[tokio::test]
    async fn test_second_reply_does_not_reach_caller() {
        let h = Harness::start(CsmsConfig::default()).await;
        let mut station = h.connect("CS-1").await;

        let call = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        let frame = station.recv().await.unwrap();

        station
            .deliver(Frame::result_for(&frame, json!({"status": "Scheduled"})))
            .await
            .unwrap();
        station
            .deliver(Frame::result_for(&frame, json!({"status": "Rejected"})))
            .await
            .unwrap();

        assert_eq!(call.response().await.unwrap().status, ResetStatus::Scheduled);

        let stats = h.csms.correlator().stats();
        crate::harness::wait_until(|| stats.total_rejected.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.total_completed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_delivered_once() {
        let config = CsmsConfig {
            sweep_interval_ms: 10,
            ..Default::default()
        };
        let h = Harness::start(config).await;
        let _station = h.connect("CS-1").await;

        let call = h
            .csms
            .send(
                &Reset::new("CS-1", ResetType::Immediate),
                RequestOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();
        let id = call.request_id().clone();

        assert_eq!(
            call.response().await.err(),
            Some(DispatchError::RequestTimeout {
                request_id: id,
                timeout_ms: 100
            })
        );

        // Let the sweep run a few more times; it must find nothing left to expire.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = h.csms.correlator().stats();
        assert_eq!(stats.total_timeouts.load(Ordering::Relaxed), 1);
        assert_eq!(h.csms.correlator().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_responses_match_by_id_not_order() {
        let h = Harness::start(CsmsConfig::default()).await;
        let mut station = h.connect("CS-1").await;

        let first = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        let second = h
            .csms
            .send(&Reset::new("CS-1", ResetType::OnIdle), RequestOptions::default())
            .await
            .unwrap();
        let f1 = station.recv().await.unwrap();
        let f2 = station.recv().await.unwrap();

        station
            .deliver(Frame::result_for(&f2, json!({"status": "Scheduled"})))
            .await
            .unwrap();
        station
            .deliver(Frame::result_for(&f1, json!({"status": "Accepted"})))
            .await
            .unwrap();

        assert_eq!(first.response().await.unwrap().status, ResetStatus::Accepted);
        assert_eq!(second.response().await.unwrap().status, ResetStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_independent_instances_share_nothing() {
        let a = Harness::start(CsmsConfig::default()).await;
        let b = Harness::start(CsmsConfig::default()).await;
        a.csms.add_static_route(p("CS-17"), p("HUB-1"));
        a.csms
            .encryption_contexts()
            .configure(p("CS-9"), None, context(0));

        assert!(b.csms.routing().is_empty());
        assert!(!b.csms.encryption_contexts().contains(&p("CS-9"), None));
    }
}

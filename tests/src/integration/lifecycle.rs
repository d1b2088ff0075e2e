//! # Lifecycle Tests
//!
//! Shutdown drain and grace period, peer rehoming across channels, and
//! connection loss scoped to the requests that used the lost peer.

#[cfg(test)]
mod tests {
    use crate::harness::{wait_until, Harness};
    use csms_dispatch::operations::{
        ChangeAvailability, OperationalStatus, Reset, ResetStatus, ResetType,
    };
    use csms_dispatch::{
        ChannelId, CsmsConfig, DispatchError, MemoryChannel, RegistryState, RequestOptions,
    };
    use csms_types::{Frame, PeerId};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn p(id: &str) -> PeerId {
        PeerId::new(id)
    }

    fn reset(to: &str) -> Reset {
        Reset::new(to, ResetType::Immediate)
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_request() {
        let h = Harness::start(CsmsConfig::default()).await;
        let mut station = h.connect("CS-1").await;

        let call = h.csms.send(&reset("CS-1"), RequestOptions::default()).await.unwrap();
        let frame = station.recv().await.unwrap();

        let shutdown = {
            let csms = h.csms.clone();
            tokio::spawn(async move { csms.shutdown("maintenance", true).await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!shutdown.is_finished());
        assert_eq!(h.csms.registry().state(), RegistryState::Draining);

        // Replies are still accepted while draining.
        station
            .deliver(Frame::result_for(&frame, json!({"status": "Accepted"})))
            .await
            .unwrap();
        assert_eq!(call.response().await.unwrap().status, ResetStatus::Accepted);

        let report = shutdown.await.unwrap();
        assert!(report.drained);
        assert_eq!(report.remaining, 0);
        assert_eq!(h.csms.registry().state(), RegistryState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_gives_up_after_grace_period() {
        let config = CsmsConfig {
            shutdown_grace_ms: 2_000,
            ..Default::default()
        };
        let h = Harness::start(config).await;
        let _station = h.connect("CS-1").await;

        let call = h.csms.send(&reset("CS-1"), RequestOptions::default()).await.unwrap();

        let started = tokio::time::Instant::now();
        let report = h.csms.shutdown("maintenance", true).await;
        assert!(started.elapsed() >= Duration::from_millis(2_000));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!report.drained);
        assert_eq!(report.remaining, 1);

        assert!(matches!(
            call.response().await,
            Err(DispatchError::ChannelUnavailable { ref peer, .. }) if *peer == p("CS-1")
        ));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work_and_is_idempotent() {
        let h = Harness::start(CsmsConfig::default()).await;
        let _station = h.connect("CS-1").await;

        let first = h.csms.shutdown("stop", false).await;
        assert_eq!(first.peers_closed, 1);
        assert!(h.channel("ws").is_closed());

        assert_eq!(
            h.csms.send(&reset("CS-1"), RequestOptions::default()).await.err(),
            Some(DispatchError::ShuttingDown)
        );
        assert_eq!(h.csms.shutdown("stop", true).await, Default::default());
    }

    // =============================================================================
    // REHOMING
    // =============================================================================

    #[tokio::test]
    async fn test_peer_rehomes_to_newer_channel() {
        let h = Harness::with_channels(CsmsConfig::default(), &["primary", "backup"]).await;
        let mut old = h.connect_on(h.channel("primary"), "CS-1").await;
        let mut new = h.connect_on(h.channel("backup"), "CS-1").await;

        assert_eq!(
            h.csms.registry().binding(&p("CS-1")),
            Some(ChannelId::new("backup"))
        );

        let call = h.csms.send(&reset("CS-1"), RequestOptions::default()).await.unwrap();
        let frame = new.recv().await.unwrap();
        assert!(old.try_recv().is_none());

        // The old connection going away must not unbind the new one.
        old.disconnect().await;
        tokio::task::yield_now().await;
        assert!(h.csms.correlator().is_pending(call.request_id()));

        new.deliver(Frame::result_for(&frame, json!({"status": "Accepted"})))
            .await
            .unwrap();
        assert!(call.response().await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_added_while_running() {
        let h = Harness::start(CsmsConfig::default()).await;
        let late = MemoryChannel::new("late");
        h.csms.register_channel(Arc::new(late.clone())).await.unwrap();

        let mut station = h.connect_on(&late, "CS-5").await;
        let _call = h.csms.send(&reset("CS-5"), RequestOptions::default()).await.unwrap();
        assert!(station.recv().await.is_some());
    }

    // =============================================================================
    // CONNECTION LOSS
    // =============================================================================

    #[tokio::test]
    async fn test_hub_loss_fails_only_routed_requests() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.add_static_route(p("CS-17"), p("HUB-1"));
        let hub = h.connect("HUB-1").await;
        let mut direct = h.connect("CS-2").await;

        let routed = h.csms.send(&reset("CS-17"), RequestOptions::default()).await.unwrap();
        let request = ChangeAvailability {
            destination: p("CS-2"),
            operational_status: OperationalStatus::Operative,
            evse: None,
        };
        let unaffected = h.csms.send(&request, RequestOptions::default()).await.unwrap();

        hub.disconnect().await;

        assert!(matches!(
            routed.response().await,
            Err(DispatchError::ChannelUnavailable { ref peer, .. }) if *peer == p("HUB-1")
        ));
        assert!(h.csms.correlator().is_pending(unaffected.request_id()));

        let frame = direct.recv().await.unwrap();
        direct
            .deliver(Frame::result_for(&frame, json!({"status": "Accepted"})))
            .await
            .unwrap();
        assert!(unaffected.response().await.is_ok());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_is_unavailable() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.add_static_route(p("CS-17"), p("HUB-1"));
        let hub = h.connect("HUB-1").await;
        hub.disconnect().await;
        wait_until(|| h.csms.registry().binding(&p("HUB-1")).is_none()).await;

        assert!(matches!(
            h.csms.send(&reset("CS-17"), RequestOptions::default()).await,
            Err(DispatchError::ChannelUnavailable { .. })
        ));
        assert_eq!(h.csms.correlator().pending_count(), 0);
    }
}

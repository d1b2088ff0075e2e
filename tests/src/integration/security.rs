//! # Security and Notification Tests
//!
//! Signing rules, end-to-end payload encryption with replay protection, and
//! the before-send / after-receive notification path.

#[cfg(test)]
mod tests {
    use crate::harness::{call_payload, Harness};
    use chrono::{TimeZone, Utc};
    use csms_bus::{HandlerError, Phase};
    use csms_crypto::{
        verify_signature, ContextMaterial, CryptoError, Ed25519KeyPair, EncryptionContextStore,
        SecretKey, Secp256k1KeyPair, SigningMaterial,
    };
    use csms_dispatch::operations::{
        Firmware, Reset, ResetStatus, ResetType, UpdateFirmware, UpdateFirmwareStatus,
    };
    use csms_dispatch::{
        CsmsConfig, CsmsRequest, DispatchError, EventDetail, MessageMatcher, RequestOptions,
        SignaturePolicy, SignatureRule, UnsignedPolicy,
    };
    use csms_types::{AlgorithmId, Frame, KeyRef, PeerId, SealedPayload};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn p(id: &str) -> PeerId {
        PeerId::new(id)
    }

    fn update_firmware(to: &str) -> UpdateFirmware {
        UpdateFirmware {
            destination: p(to),
            request_id: 7,
            retries: None,
            retry_interval: None,
            firmware: Firmware {
                location: "https://firmware.example/cs-1.bin".into(),
                retrieve_date_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                install_date_time: None,
                signing_certificate: None,
                signature: None,
            },
        }
    }

    fn firmware_only(key: &str, algorithm: AlgorithmId) -> SignatureRule {
        SignatureRule::new(
            MessageMatcher::kinds([UpdateFirmware::KIND]),
            KeyRef::new(key),
            algorithm,
        )
    }

    // =============================================================================
    // SIGNING
    // =============================================================================

    #[tokio::test]
    async fn test_only_matching_kinds_are_signed() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.key_ring().insert(
            KeyRef::new("fw"),
            SigningMaterial::Secp256k1(Secp256k1KeyPair::generate()),
        );
        h.csms
            .add_signature_rule(firmware_only("fw", AlgorithmId::EcdsaSecp256k1));
        let mut station = h.connect("CS-1").await;

        let _fw = h
            .csms
            .send(&update_firmware("CS-1"), RequestOptions::default())
            .await
            .unwrap();
        let signed = station.recv().await.unwrap();
        let block = signed.signature.clone().expect("firmware update is signed");
        assert_eq!(block.algorithm, AlgorithmId::EcdsaSecp256k1);

        let (algorithm, public_key) = h.csms.key_ring().public_key(&KeyRef::new("fw")).unwrap();
        let signature = hex::decode(&block.signature).unwrap();
        verify_signature(
            algorithm,
            &public_key,
            &signed.signing_bytes().unwrap(),
            &signature,
        )
        .unwrap();

        let _reset = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        assert!(station.recv().await.unwrap().signature.is_none());
    }

    #[tokio::test]
    async fn test_tampered_frame_fails_verification() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.key_ring().insert(
            KeyRef::new("fw"),
            SigningMaterial::Ed25519(Ed25519KeyPair::generate()),
        );
        h.csms.add_signature_rule(firmware_only("fw", AlgorithmId::Ed25519));
        let mut station = h.connect("CS-1").await;

        let _fw = h
            .csms
            .send(&update_firmware("CS-1"), RequestOptions::default())
            .await
            .unwrap();
        let mut frame = station.recv().await.unwrap();
        let block = frame.signature.clone().unwrap();
        frame.destination = p("CS-2");

        let (algorithm, public_key) = h.csms.key_ring().public_key(&KeyRef::new("fw")).unwrap();
        assert_eq!(
            verify_signature(
                algorithm,
                &public_key,
                &frame.signing_bytes().unwrap(),
                &hex::decode(&block.signature).unwrap(),
            ),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_unsigned_kinds() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.key_ring().insert(
            KeyRef::new("fw"),
            SigningMaterial::Ed25519(Ed25519KeyPair::generate()),
        );
        h.csms.set_signature_policy(
            SignaturePolicy::new(UnsignedPolicy::Reject)
                .with_rule(firmware_only("fw", AlgorithmId::Ed25519)),
        );
        let mut station = h.connect("CS-1").await;

        assert_eq!(
            h.csms
                .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
                .await
                .err(),
            Some(DispatchError::SignaturePolicyViolation {
                kind: Reset::KIND,
                destination: p("CS-1"),
            })
        );
        assert_eq!(h.csms.correlator().pending_count(), 0);
        assert!(station.try_recv().is_none());

        assert!(h
            .csms
            .send(&update_firmware("CS-1"), RequestOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_signing_key_leaves_nothing_pending() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.add_signature_rule(firmware_only("absent", AlgorithmId::Ed25519));
        let _station = h.connect("CS-1").await;

        let err = h
            .csms
            .send(&update_firmware("CS-1"), RequestOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::KeyNotConfigured(_)));
        assert_eq!(h.csms.correlator().pending_count(), 0);
    }

    // =============================================================================
    // ENCRYPTION
    // =============================================================================

    const CSMS_TO_STATION: [u8; 32] = [0x42; 32];
    const STATION_TO_CSMS: [u8; 32] = [0x24; 32];

    /// Configure both ends of the CS-9 context; returns the station's store.
    fn pair_contexts(h: &Harness) -> EncryptionContextStore {
        h.csms.encryption_contexts().configure(
            p("CS-9"),
            None,
            ContextMaterial {
                encrypt_key: SecretKey::from_bytes(CSMS_TO_STATION),
                decrypt_key: SecretKey::from_bytes(STATION_TO_CSMS),
                nonce: 1,
                counter: 0,
            },
        );
        let station = EncryptionContextStore::for_station();
        station.configure(
            p("CS-9"),
            None,
            ContextMaterial {
                encrypt_key: SecretKey::from_bytes(STATION_TO_CSMS),
                decrypt_key: SecretKey::from_bytes(CSMS_TO_STATION),
                nonce: 1,
                counter: 0,
            },
        );
        station
    }

    fn sealed_reply(station: &EncryptionContextStore, request: &Frame, body: serde_json::Value) -> Frame {
        let plaintext = serde_json::to_vec(&body).unwrap();
        let sealed = station.seal(&p("CS-9"), None, &plaintext).unwrap();
        Frame::result_for(request, sealed.to_value().unwrap())
    }

    #[tokio::test]
    async fn test_encrypted_round_trip() {
        let h = Harness::start(CsmsConfig::default()).await;
        let keys = pair_contexts(&h);
        let mut station = h.connect("CS-9").await;

        let call = h
            .csms
            .send(
                &Reset::new("CS-9", ResetType::OnIdle),
                RequestOptions::default().encrypted(None),
            )
            .await
            .unwrap();

        let frame = station.recv().await.unwrap();
        let sealed = SealedPayload::from_value(call_payload(&frame))
            .unwrap()
            .expect("payload is sealed");
        let opened: serde_json::Value =
            serde_json::from_slice(&keys.open(&p("CS-9"), &sealed).unwrap()).unwrap();
        assert_eq!(opened, json!({"type": "OnIdle"}));

        station
            .deliver(sealed_reply(&keys, &frame, json!({"status": "Scheduled"})))
            .await
            .unwrap();
        assert_eq!(call.response().await.unwrap().status, ResetStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_replayed_sealed_reply_is_rejected() {
        let h = Harness::start(CsmsConfig::default()).await;
        let keys = pair_contexts(&h);
        let mut station = h.connect("CS-9").await;
        let options = || RequestOptions::default().encrypted(None);

        let first = h
            .csms
            .send(&Reset::new("CS-9", ResetType::Immediate), options())
            .await
            .unwrap();
        let f1 = station.recv().await.unwrap();
        let reply = sealed_reply(&keys, &f1, json!({"status": "Accepted"}));
        station.deliver(reply.clone()).await.unwrap();
        assert!(first.response().await.is_ok());

        // Same sealed body under the next request's id.
        let second = h
            .csms
            .send(&Reset::new("CS-9", ResetType::Immediate), options())
            .await
            .unwrap();
        let f2 = station.recv().await.unwrap();
        let replayed = Frame::result_for(&f2, call_payload_of_result(&reply));
        station.deliver(replayed).await.unwrap();

        assert_eq!(
            second.response().await.err(),
            Some(DispatchError::Crypto(CryptoError::ReplayDetected {
                counter: 0,
                last_accepted: 0,
            }))
        );
    }

    fn call_payload_of_result(frame: &Frame) -> serde_json::Value {
        match &frame.body {
            csms_types::FrameBody::CallResult { payload, .. } => payload.clone(),
            other => panic!("expected a result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_encrypting_without_context_fails_before_sending() {
        let h = Harness::start(CsmsConfig::default()).await;
        let mut station = h.connect("CS-9").await;

        let err = h
            .csms
            .send(
                &Reset::new("CS-9", ResetType::Immediate),
                RequestOptions::default().encrypted(Some(3)),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::KeyNotConfigured(_)));
        assert!(station.try_recv().is_none());
    }

    // =============================================================================
    // NOTIFICATIONS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_is_bounded_by_budget() {
        let config = CsmsConfig {
            notifier_budget_ms: 100,
            ..Default::default()
        };
        let h = Harness::start(config).await;
        h.csms.notifier().on_before_send(Reset::KIND, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let mut station = h.connect("CS-1").await;

        let started = tokio::time::Instant::now();
        let _call = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(station.recv().await.is_some());
        assert_eq!(h.csms.notifier().stats().handler_overruns, 1);
    }

    #[tokio::test]
    async fn test_failing_handlers_do_not_reach_the_caller() {
        let h = Harness::start(CsmsConfig::default()).await;
        h.csms.notifier().on_before_send(Reset::KIND, |_| async {
            Err(HandlerError::new("audit backend down"))
        });
        h.csms.notifier().on_after_receive(Reset::KIND, |event| async move {
            assert!(event.request_id.as_str().is_empty(), "handler bug");
            Ok(())
        });
        let mut station = h.connect("CS-1").await;

        let call = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        let frame = station.recv().await.unwrap();
        station
            .deliver(Frame::result_for(&frame, json!({"status": "Accepted"})))
            .await
            .unwrap();

        assert_eq!(call.response().await.unwrap().status, ResetStatus::Accepted);
        crate::harness::wait_until(|| h.csms.notifier().stats().handler_failures == 2).await;
    }

    #[tokio::test]
    async fn test_handlers_see_both_phases_for_their_kind() {
        let h = Harness::start(CsmsConfig::default()).await;
        let seen = Arc::new(AtomicUsize::new(0));
        for phase in [Phase::BeforeSend, Phase::AfterReceive] {
            let seen = Arc::clone(&seen);
            h.csms
                .notifier()
                .subscribe(phase, Some(UpdateFirmware::KIND), move |_| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                });
        }
        let mut station = h.connect("CS-1").await;

        let _reset = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        let call = h
            .csms
            .send(&update_firmware("CS-1"), RequestOptions::default())
            .await
            .unwrap();
        station.recv().await.unwrap();
        let frame = station.recv().await.unwrap();
        station
            .deliver(Frame::result_for(&frame, json!({"status": "Accepted"})))
            .await
            .unwrap();
        assert_eq!(
            call.response().await.unwrap().status,
            UpdateFirmwareStatus::Accepted
        );
        crate::harness::wait_until(|| seen.load(Ordering::SeqCst) == 2).await;
    }

    #[tokio::test]
    async fn test_audit_stream_records_request_and_reply() {
        let h = Harness::start(CsmsConfig::default()).await;
        let mut audit = h.csms.audit_stream(Some(Reset::KIND));
        let mut station = h.connect("CS-1").await;

        let call = h
            .csms
            .send(&Reset::new("CS-1", ResetType::Immediate), RequestOptions::default())
            .await
            .unwrap();
        let id = call.request_id().clone();
        let frame = station.recv().await.unwrap();
        station
            .deliver(Frame::result_for(&frame, json!({"status": "Rejected"})))
            .await
            .unwrap();
        call.response().await.unwrap();

        let before = audit.next().await.unwrap();
        assert_eq!(before.phase, Phase::BeforeSend);
        assert_eq!(before.event.request_id, id);
        assert!(matches!(
            before.event.detail,
            EventDetail::Request { encrypted: false, signed: false, .. }
        ));

        let after = audit.next().await.unwrap();
        assert_eq!(after.phase, Phase::AfterReceive);
        assert_eq!(
            after.event.detail,
            EventDetail::Response {
                payload: json!({"status": "Rejected"})
            }
        );
    }
}

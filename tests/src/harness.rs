//! Test harness: a running dispatch core plus simulated stations and hubs.

use csms_dispatch::domain::SequentialGenerator;
use csms_dispatch::{Channel, Csms, CsmsConfig, MemoryChannel, RemotePeer};
use csms_telemetry::TelemetryConfig;
use csms_types::{Frame, FrameBody, PeerId};
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install the subscriber once per test binary. Output only with `CSMS_TEST_LOG` set.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let config = TelemetryConfig {
            console_output: std::env::var_os("CSMS_TEST_LOG").is_some(),
            ..TelemetryConfig::from_env()
        };
        let _ = csms_telemetry::init_tracing(&config);
    });
}

/// A started core with one or more in-process channels.
pub struct Harness {
    pub csms: Csms,
    pub channels: Vec<MemoryChannel>,
}

impl Harness {
    /// Start a core with a single channel named `ws`.
    pub async fn start(config: CsmsConfig) -> Self {
        Self::with_channels(config, &["ws"]).await
    }

    pub async fn with_channels(config: CsmsConfig, names: &[&str]) -> Self {
        init_test_tracing();
        let channels: Vec<MemoryChannel> = names.iter().map(|n| MemoryChannel::new(*n)).collect();
        let mut builder =
            Csms::builder(config).id_generator(Arc::new(SequentialGenerator::new("req")));
        for channel in &channels {
            builder = builder.channel(Arc::new(channel.clone()));
        }
        let csms = builder.build().expect("valid config");
        csms.start().await.expect("core starts");
        Self { csms, channels }
    }

    pub fn channel(&self, name: &str) -> &MemoryChannel {
        self.channels
            .iter()
            .find(|c| c.id().as_str() == name)
            .expect("channel exists")
    }

    /// Connect `peer` on the first channel and wait until it is bound.
    pub async fn connect(&self, peer: &str) -> RemotePeer {
        self.connect_on(&self.channels[0], peer).await
    }

    /// Connect `peer` on `channel` and wait until the registry binds it there.
    pub async fn connect_on(&self, channel: &MemoryChannel, peer: &str) -> RemotePeer {
        let remote = channel.connect(peer).await.expect("channel accepts");
        let id = PeerId::new(peer);
        let expected = channel.id().clone();
        wait_until(|| self.csms.registry().binding(&id).as_ref() == Some(&expected)).await;
        remote
    }
}

/// Poll `condition` until it holds; panics if it never does.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Payload of a call frame.
pub fn call_payload(frame: &Frame) -> &serde_json::Value {
    match &frame.body {
        FrameBody::Call { payload, .. } => payload,
        other => panic!("expected a call, got {other:?}"),
    }
}

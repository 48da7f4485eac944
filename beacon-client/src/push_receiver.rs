//! UDP push receiver.
//!
//! The server pushes changed service views as datagrams; every decoded
//! frame is acked with the frame's own `lastRefTime` so the server can
//! stop retrying. Payload frames go through the reactor's normal diff
//! path, so a push and a pull are indistinguishable downstream.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::warn;

use beacon_core::NetworkError;
use beacon_core::Result;
use beacon_core::ServiceInfo;

use crate::reactor::ReactorCore;

#[derive(Debug, Deserialize)]
struct PushPacket {
    #[serde(rename = "type")]
    packet_type: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default, rename = "lastRefTime")]
    last_ref_time: u64,
}

#[derive(Debug, Serialize)]
struct PushAck<'a> {
    #[serde(rename = "type")]
    packet_type: &'static str,
    #[serde(rename = "lastRefTime")]
    last_ref_time: u64,
    data: &'a str,
}

pub struct PushReceiver {
    port: u16,
}

impl PushReceiver {
    /// Binds an ephemeral UDP port and serves it until shutdown. The
    /// port is published to the core so queries can register this
    /// client for pushes.
    pub(crate) async fn spawn(
        core: Arc<ReactorCore>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(NetworkError::Socket)?;
        let port = socket.local_addr().map_err(NetworkError::Socket)?.port();
        core.set_push_port(port);
        debug!(port, "push receiver listening");

        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    received = socket.recv_from(&mut buf) => {
                        let (len, from) = match received {
                            Ok(received) => received,
                            Err(e) => {
                                error!(error = %e, "push receiver socket error");
                                continue;
                            }
                        };
                        if let Some(ack) = handle_frame(&core, &buf[..len]) {
                            if let Err(e) = socket.send_to(ack.as_bytes(), from).await {
                                warn!(error = %e, "push ack failed");
                            }
                        }
                    }
                }
            }
            debug!("push receiver stopped");
        });

        Ok(Self { port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Decodes one frame and returns the ack to send, or nothing for
/// undecodable frames.
fn handle_frame(
    core: &ReactorCore,
    bytes: &[u8],
) -> Option<String> {
    let packet: PushPacket = match serde_json::from_slice(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(error = %e, "undecodable push frame dropped");
            return None;
        }
    };

    let dump;
    let ack_data = match packet.packet_type.as_str() {
        "dom" | "service" => {
            if let Some(data) = &packet.data {
                if let Err(e) = core.process_service_json(data) {
                    error!(error = %e, "push payload rejected");
                }
            }
            ""
        }
        "dump" => {
            let views: HashMap<String, ServiceInfo> = core
                .service_info_map
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect();
            dump = serde_json::to_string(&views).unwrap_or_default();
            dump.as_str()
        }
        other => {
            warn!(packet_type = %other, "unknown push frame type");
            ""
        }
    };

    let ack = PushAck {
        packet_type: "push-ack",
        last_ref_time: packet.last_ref_time,
        data: ack_data,
    };
    serde_json::to_string(&ack).ok()
}

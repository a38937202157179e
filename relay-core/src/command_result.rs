use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

/// Abstraction over "write one text frame back to this connection", so
/// `relay-core` never depends on the concrete WebSocket/transport type
/// `relay-server` uses.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send_text(&self, text: String);
}

/// Per-connection metadata the pipeline needs: the client's address and a
/// handle to write frames back.
#[derive(Clone)]
pub struct ConnectionContext {
    pub remote_addr: IpAddr,
    outbox: Arc<dyn OutboundChannel>,
}

impl ConnectionContext {
    pub fn new(remote_addr: IpAddr, outbox: Arc<dyn OutboundChannel>) -> Self {
        Self { remote_addr, outbox }
    }

    /// Writes `["OK", event_id, accepted, reason]` to the connection.
    /// Called at most once per admission by the pipeline itself; a kind
    /// handler that takes over responsibility for emitting (pipeline stage
    /// 10) calls this directly too.
    pub async fn emit_ok(&self, event_id: &str, accepted: bool, reason: &str) {
        let frame = serde_json::json!(["OK", event_id, accepted, reason]);
        let text = frame.to_string();
        self.outbox.send_text(text).await;
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingChannel {
        pub frames: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutboundChannel for RecordingChannel {
        async fn send_text(&self, text: String) {
            self.frames.lock().await.push(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::RecordingChannel;
    use super::*;

    #[tokio::test]
    async fn emit_ok_writes_expected_frame_shape() {
        let channel = Arc::new(RecordingChannel::default());
        let ctx = ConnectionContext::new("127.0.0.1".parse().unwrap(), channel.clone());

        ctx.emit_ok("abc123", false, "rejected: too long").await;

        let frames = channel.frames.lock().await;
        assert_eq!(frames.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed, serde_json::json!(["OK", "abc123", false, "rejected: too long"]));
    }
}

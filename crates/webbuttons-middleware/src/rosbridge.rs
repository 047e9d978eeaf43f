//! rosbridge transport for live ROS 2 graphs.
//!
//! [`RosbridgeTransport`] talks to a `rosbridge_server` over WebSocket using
//! the rosbridge v2 JSON protocol:
//!
//! * **open** – connects, then advertises the topic as
//!   `std_msgs/msg/Int32`.
//! * **publish** – sends `{"op":"publish","topic":…,"msg":{"data":…}}`.
//! * **close** – unadvertises the topic and closes the WebSocket.
//!
//! The read half of the socket is drained by a background task, which also
//! lets tungstenite answer pings.  When the server goes away (e.g. a
//! `rosbridge_server` restart) the next publish reconnects and advertises
//! again, bounded by the connect timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use webbuttons_types::{ButtonError, SELECTION_MSG_TYPE};

use crate::transport::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on connecting and advertising, for the first open and for
/// every reconnect.  Kept under the republisher's shutdown wait.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

struct Session {
    sink: WsSink,
    /// Cleared by the reader task once the server closes the socket.
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Session {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Publishes the selection to a `rosbridge_server` WebSocket.
pub struct RosbridgeTransport {
    /// `ws://host:port` of the rosbridge endpoint.
    url: String,
    connect_timeout: Duration,
    /// Set by `open`, cleared by `close`.
    topic: Option<String>,
    session: Option<Session>,
}

impl RosbridgeTransport {
    /// Create a transport for the rosbridge endpoint at `url`
    /// (e.g. `"ws://localhost:9090"`).  No connection is made until
    /// [`Transport::open`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            topic: None,
            session: None,
        }
    }

    /// Override the connect timeout (builder-style).
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// The configured rosbridge URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a connection is up and the server has not closed it.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_alive)
    }

    /// Build the `advertise` frame registering `topic` as an Int32 publisher.
    pub fn advertise_frame(topic: &str) -> String {
        json!({
            "op": "advertise",
            "topic": topic,
            "type": SELECTION_MSG_TYPE
        })
        .to_string()
    }

    /// Build the `publish` frame carrying `value` on `topic`.
    pub fn publish_frame(topic: &str, value: i32) -> String {
        json!({
            "op": "publish",
            "topic": topic,
            "msg": { "data": value }
        })
        .to_string()
    }

    /// Build the `unadvertise` frame releasing `topic`.
    pub fn unadvertise_frame(topic: &str) -> String {
        json!({
            "op": "unadvertise",
            "topic": topic
        })
        .to_string()
    }

    async fn connect(&self, topic: &str) -> Result<Session, ButtonError> {
        let (ws, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                ButtonError::Transport(format!(
                    "rosbridge connect to {} timed out after {} ms",
                    self.url,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| ButtonError::Transport(format!("rosbridge connect to {}: {e}", self.url)))?;

        let (mut sink, stream) = ws.split();
        send_frame(&mut sink, Self::advertise_frame(topic)).await?;

        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(drain_inbound(stream, Arc::clone(&alive), self.url.clone()));
        Ok(Session { sink, alive, reader })
    }
}

async fn send_frame(sink: &mut WsSink, frame: String) -> Result<(), ButtonError> {
    sink.send(Message::Text(frame.into()))
        .await
        .map_err(|e| ButtonError::Transport(format!("rosbridge send error: {e}")))
}

/// Read and discard server traffic (status frames, pings) until the socket
/// closes.  Pongs are queued and flushed by tungstenite while reading.
async fn drain_inbound(mut stream: SplitStream<WsStream>, alive: Arc<AtomicBool>, url: String) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => debug!(url = %url, frame = %text.as_str(), "rosbridge message"),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(url = %url, error = %e, "rosbridge read error");
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
    debug!(url = %url, "rosbridge connection closed");
}

#[async_trait]
impl Transport for RosbridgeTransport {
    async fn open(&mut self, topic: &str) -> Result<(), ButtonError> {
        self.session = None;
        let session = self.connect(topic).await?;
        info!(url = %self.url, topic, "advertised selection topic on rosbridge");
        self.topic = Some(topic.to_string());
        self.session = Some(session);
        Ok(())
    }

    async fn publish(&mut self, value: i32) -> Result<(), ButtonError> {
        let Some(topic) = self.topic.clone() else {
            return Err(ButtonError::Transport(
                "rosbridge publish before open".to_string(),
            ));
        };

        // One reconnect attempt per publish while the server is unreachable.
        let mut session = match self.session.take() {
            Some(session) if session.is_alive() => session,
            _ => {
                info!(url = %self.url, topic = %topic, "reconnecting to rosbridge");
                self.connect(&topic).await?
            }
        };
        match send_frame(&mut session.sink, Self::publish_frame(&topic, value)).await {
            Ok(()) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "rosbridge connection lost");
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ButtonError> {
        let (Some(topic), Some(mut session)) = (self.topic.take(), self.session.take()) else {
            return Ok(());
        };
        let unadvertised = send_frame(&mut session.sink, Self::unadvertise_frame(&topic)).await;
        let closed = session
            .sink
            .close()
            .await
            .map_err(|e| ButtonError::Transport(format!("rosbridge close error: {e}")));
        debug!(url = %self.url, topic = %topic, "rosbridge session closed");
        unadvertised.and(closed)
    }

    fn describe(&self) -> String {
        format!("rosbridge {}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::sleep;
    use tokio_tungstenite::accept_async;

    fn forward_text(msg: &Message, tx: &mpsc::UnboundedSender<Value>) -> bool {
        match msg {
            Message::Text(text) => tx.send(serde_json::from_str(text.as_str()).unwrap()).is_ok(),
            _ => true,
        }
    }

    /// Accept one WebSocket client and forward every text frame it sends.
    async fn spawn_rosbridge_stub() -> (String, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
            }
        });
        (format!("ws://{addr}"), rx)
    }

    /// Drop the first client right after it advertises, then forward frames
    /// from the next client on the same port.
    async fn spawn_restarting_stub() -> (String, oneshot::Receiver<()>, mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _advertise = ws.next().await;
            drop(ws);
            let _ = dropped_tx.send(());

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if !forward_text(&msg, &tx) {
                    break;
                }
            }
        });
        (format!("ws://{addr}"), dropped_rx, rx)
    }

    /// Drop the first client and stop listening altogether.
    async fn spawn_vanishing_stub() -> (String, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (gone_tx, gone_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _advertise = ws.next().await;
            drop(ws);
            drop(listener);
            let _ = gone_tx.send(());
        });
        (format!("ws://{addr}"), gone_rx)
    }

    /// After the advertise, send a status frame and a ping, and report the
    /// pong the client sends back.
    async fn spawn_chatty_stub() -> (String, oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (pong_tx, pong_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _advertise = ws.next().await;
            let status = json!({ "op": "status", "level": "info", "msg": "advertised" });
            ws.send(Message::Text(status.to_string().into())).await.unwrap();
            ws.send(Message::Ping(b"rb".to_vec().into())).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Pong(payload) = msg {
                    let _ = pong_tx.send(payload.to_vec());
                    break;
                }
            }
            // Keep the socket open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });
        (format!("ws://{addr}"), pong_rx)
    }

    #[test]
    fn advertise_frame_declares_int32() {
        let frame: Value =
            serde_json::from_str(&RosbridgeTransport::advertise_frame("/selected_button")).unwrap();
        assert_eq!(frame["op"], "advertise");
        assert_eq!(frame["topic"], "/selected_button");
        assert_eq!(frame["type"], "std_msgs/msg/Int32");
    }

    #[test]
    fn publish_frame_carries_data_field() {
        let frame: Value =
            serde_json::from_str(&RosbridgeTransport::publish_frame("/selected_button", 7)).unwrap();
        assert_eq!(frame["op"], "publish");
        assert_eq!(frame["msg"]["data"], 7);
    }

    #[test]
    fn unadvertise_frame_names_topic() {
        let frame: Value =
            serde_json::from_str(&RosbridgeTransport::unadvertise_frame("/t")).unwrap();
        assert_eq!(frame["op"], "unadvertise");
        assert_eq!(frame["topic"], "/t");
    }

    #[test]
    fn describe_includes_url() {
        let transport = RosbridgeTransport::new("ws://robot.local:9090");
        assert_eq!(transport.url(), "ws://robot.local:9090");
        assert!(transport.describe().contains("ws://robot.local:9090"));
    }

    #[tokio::test]
    async fn publish_before_open_is_a_transport_error() {
        let mut transport = RosbridgeTransport::new("ws://127.0.0.1:9");
        let result = transport.publish(1).await;
        assert!(matches!(result, Err(ButtonError::Transport(_))));
    }

    #[tokio::test]
    async fn close_without_open_is_noop() {
        let mut transport = RosbridgeTransport::new("ws://127.0.0.1:9");
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn open_fails_when_nothing_listens() {
        // Bind then drop to get a port with no listener behind it.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = RosbridgeTransport::new(format!("ws://127.0.0.1:{port}"));
        let result = transport.open("/selected_button").await;
        assert!(matches!(result, Err(ButtonError::Transport(_))));
    }

    #[tokio::test]
    async fn frames_arrive_in_lifecycle_order() {
        let (url, mut frames) = spawn_rosbridge_stub().await;
        let mut transport = RosbridgeTransport::new(url);

        transport.open("/selected_button").await.unwrap();
        transport.publish(0).await.unwrap();
        transport.publish(4).await.unwrap();
        transport.close().await.unwrap();

        let advertise = frames.recv().await.unwrap();
        assert_eq!(advertise["op"], "advertise");

        let first = frames.recv().await.unwrap();
        assert_eq!(first["op"], "publish");
        assert_eq!(first["topic"], "/selected_button");
        assert_eq!(first["msg"]["data"], 0);

        let second = frames.recv().await.unwrap();
        assert_eq!(second["msg"]["data"], 4);

        let unadvertise = frames.recv().await.unwrap();
        assert_eq!(unadvertise["op"], "unadvertise");
    }

    #[tokio::test]
    async fn publish_reconnects_after_server_restart() {
        let (url, dropped, mut frames) = spawn_restarting_stub().await;
        let mut transport = RosbridgeTransport::new(url);
        transport.open("/selected_button").await.unwrap();
        dropped.await.unwrap();

        // The first publish after the drop may still land in the dead
        // socket; keep publishing until the restarted server sees a frame.
        let first = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let _ = transport.publish(6).await;
                if let Ok(frame) = frames.try_recv() {
                    return frame;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("publishing must resume on the restarted server");

        assert_eq!(first["op"], "advertise");
        assert_eq!(first["topic"], "/selected_button");
        let publish = frames.recv().await.unwrap();
        assert_eq!(publish["op"], "publish");
        assert_eq!(publish["msg"]["data"], 6);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn publish_reports_errors_while_server_is_gone() {
        let (url, gone) = spawn_vanishing_stub().await;
        let mut transport = RosbridgeTransport::new(url);
        transport.open("/selected_button").await.unwrap();
        gone.await.unwrap();

        let failed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if transport.publish(1).await.is_err() {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(failed.is_ok(), "publish must fail once the server is gone");
        assert!(!transport.is_connected());

        // Still failing, never panicking, on later attempts.
        assert!(transport.publish(1).await.is_err());
    }

    #[tokio::test]
    async fn server_traffic_is_drained_and_pings_answered() {
        let (url, pong) = spawn_chatty_stub().await;
        let mut transport = RosbridgeTransport::new(url);
        transport.open("/selected_button").await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), pong)
            .await
            .expect("ping must be answered")
            .unwrap();
        assert_eq!(payload, b"rb".to_vec());

        assert!(transport.is_connected());
        transport.publish(2).await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn connect_timeout_is_configurable() {
        let transport = RosbridgeTransport::new("ws://robot:9090");
        assert_eq!(transport.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        let transport = transport.with_connect_timeout(Duration::from_millis(250));
        assert_eq!(transport.connect_timeout, Duration::from_millis(250));
    }
}

//! ストリーム接続
//!
//! 署名付きURLでWebSocketに接続し、読み取りタスク1つとディスパッチタスク1つを起動する。
//!
//! ## タスク構成
//! 1. 読み取りタスク: フレームのデコード・ack返送を行い、レスポンスをキューへ積む
//! 2. ディスパッチタスク: キューから受信順に取り出してイベントへ変換し、シンクへ送る
//!
//! キューは有界（`dispatch_queue_capacity`）で、溢れた場合は読み取り側が待つ。

use async_trait::async_trait;
use chrono::FixedOffset;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::codec::{FrameCodec, FrameSender, StructuredResponse};
use super::dispatcher::{ConnectionControl, EventDispatcher};
use super::errors::LiveError;
use super::signer::{sign_url, SignatureProvider};
use super::state::{ConnectionState, StateCell};
use super::types::{LiveEvent, Session};
use crate::config::{ClientConfig, ROOM_ID_PLACEHOLDER};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// `stop()` が読み取りタスクの終了を待つ上限。超えた場合はタスクを中断する
const READER_STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// 終了時のCloseフレーム送信の上限
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// テンプレートの `{room_id}` を内部ルームIDで置換する
pub fn build_socket_url(template: &str, internal_room_id: &str) -> Result<String, LiveError> {
    if internal_room_id.is_empty() {
        return Err(LiveError::InvalidUrl("internal room id is empty".to_string()));
    }
    if !template.contains(ROOM_ID_PLACEHOLDER) {
        return Err(LiveError::InvalidUrl(format!(
            "socket url template has no {} placeholder",
            ROOM_ID_PLACEHOLDER
        )));
    }
    Ok(template.replace(ROOM_ID_PLACEHOLDER, internal_room_id))
}

/// 読み取りタスク・ディスパッチタスク・呼び出し元で共有する状態
struct Shared {
    state: StateCell,
    writer: Mutex<Option<WsSink>>,
    shutdown: watch::Sender<bool>,
    log_target: String,
}

impl Shared {
    /// `Closed` へ遷移し、読み取りタスクに停止を通知する
    fn close(&self) -> ConnectionState {
        let previous = self.state.close();
        self.shutdown.send_replace(true);
        if previous != ConnectionState::Closed {
            log::info!(target: self.log_target.as_str(), "Connection closed (was {:?})", previous);
        }
        previous
    }
}

#[async_trait]
impl FrameSender for Shared {
    async fn send_frame(&self, data: Vec<u8>) -> Result<(), LiveError> {
        let mut shutdown = self.shutdown.subscribe();
        let stopped = *shutdown.borrow_and_update();
        if stopped {
            return Err(LiveError::NotConnected);
        }

        let send = async {
            let mut writer = self.writer.lock().await;
            let sink = writer.as_mut().ok_or(LiveError::NotConnected)?;
            sink.send(Message::Binary(data)).await?;
            Ok::<(), LiveError>(())
        };

        // 相手が読まずに書き込みが詰まっても停止通知で抜ける
        tokio::select! {
            result = send => result,
            _ = shutdown.changed() => Err(LiveError::NotConnected),
        }
    }
}

/// 接続を外部から閉じるためのハンドル
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }
}

impl ConnectionControl for ConnectionHandle {
    fn close(&self) {
        self.shared.close();
    }
}

/// ストリーム接続
pub struct StreamConnection {
    shared: Arc<Shared>,
    signer: Arc<dyn SignatureProvider>,
    socket_url_template: String,
    user_agent: String,
    queue_capacity: usize,
    offset: FixedOffset,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    pub fn new(
        config: &ClientConfig,
        signer: Arc<dyn SignatureProvider>,
        log_target: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: StateCell::new(),
                writer: Mutex::new(None),
                shutdown,
                log_target: log_target.into(),
            }),
            signer,
            socket_url_template: config.socket_url_template.clone(),
            user_agent: config.user_agent.clone(),
            queue_capacity: config.dispatch_queue_capacity.max(1),
            offset: config.utc_offset(),
            reader: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// 接続してイベント配信を開始する
    ///
    /// `Idle` からのみ呼び出せる。失敗時は `Closed` へ遷移し、再試行はしない。
    pub async fn connect(
        &self,
        session: &Session,
        events: mpsc::UnboundedSender<LiveEvent>,
    ) -> Result<(), LiveError> {
        self.shared
            .state
            .transition(ConnectionState::Idle, ConnectionState::Connecting)
            .map_err(|actual| {
                LiveError::InvalidState(format!("cannot connect from {:?}", actual))
            })?;

        let ws = match self.open(session).await {
            Ok(ws) => ws,
            Err(e) => {
                log::error!(target: self.log_target(), "Failed to connect: {}", e);
                self.shared.close();
                return Err(e);
            }
        };

        let (sink, stream) = ws.split();
        *self.shared.writer.lock().await = Some(sink);

        // 接続中にstop()された場合
        if let Err(actual) = self
            .shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Streaming)
        {
            if let Some(mut sink) = self.shared.writer.lock().await.take() {
                let _ = sink.close().await;
            }
            return Err(LiveError::InvalidState(format!(
                "connection was stopped while connecting ({:?})",
                actual
            )));
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);

        let dispatcher = EventDispatcher::new(self.offset, self.log_target());
        tokio::spawn(dispatch_loop(
            queue_rx,
            dispatcher,
            events.clone(),
            self.handle(),
        ));

        let codec = FrameCodec::new(self.offset, self.log_target());
        let reader = tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            stream,
            codec,
            events,
            queue_tx,
        ));
        *self.reader.lock().await = Some(reader);

        log::info!(
            target: self.log_target(),
            "Streaming live {} (room {})",
            session.public_id,
            session.internal_room_id
        );
        Ok(())
    }

    /// URL構築・署名・ハンドシェイク
    async fn open(&self, session: &Session) -> Result<WsStream, LiveError> {
        let url = build_socket_url(&self.socket_url_template, &session.internal_room_id)?;
        let signed_url = sign_url(self.signer.as_ref(), &url).await?;

        let mut request = signed_url
            .as_str()
            .into_client_request()
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("ttwid={}", session.session_cookie))
                .map_err(|e| LiveError::Connect(e.to_string()))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| LiveError::Connect(e.to_string()))?,
        );

        log::debug!(target: self.log_target(), "Connecting to push server (room {})", session.internal_room_id);

        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| LiveError::Connect(e.to_string()))?;
        log::debug!(target: self.log_target(), "Handshake completed: {}", response.status());

        Ok(ws)
    }

    /// 接続を閉じる
    ///
    /// この関数は冪等であり、どの状態から何度呼び出しても安全。
    /// 読み取りタスクの終了を最大 `READER_STOP_TIMEOUT` 待ち、終わらなければ中断する。
    pub async fn stop(&self) {
        self.shared.close();

        let Some(mut reader) = self.reader.lock().await.take() else {
            return;
        };
        if timeout(READER_STOP_TIMEOUT, &mut reader).await.is_ok() {
            return;
        }

        log::warn!(
            target: self.log_target(),
            "Read loop did not stop within {:?}, aborting",
            READER_STOP_TIMEOUT
        );
        reader.abort();
        let _ = reader.await;
        // 中断した場合はソケットを破棄して切断する
        drop(self.shared.writer.lock().await.take());
    }

    fn log_target(&self) -> &str {
        self.shared.log_target.as_str()
    }
}

impl Drop for StreamConnection {
    /// ドロップ時にタスクを確実に停止する
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// 読み取りループ
///
/// 読み取りエラー・切断・停止通知のいずれかで終了し、接続を閉じる
async fn read_loop(
    shared: Arc<Shared>,
    mut stream: SplitStream<WsStream>,
    codec: FrameCodec,
    events: mpsc::UnboundedSender<LiveEvent>,
    queue: mpsc::Sender<StructuredResponse>,
) {
    let target = shared.log_target.clone();
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        let stopped = *shutdown.borrow_and_update();
        if stopped {
            log::debug!(target: target.as_str(), "Read loop stopped by signal");
            break;
        }

        let message = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Binary(data))) => {
                // ack送信は停止通知で打ち切られる
                match codec.handle_frame(&data, shared.as_ref(), &events).await {
                    Ok(Some(response)) => {
                        tokio::select! {
                            sent = queue.send(response) => {
                                if sent.is_err() {
                                    log::debug!(target: target.as_str(), "Dispatch worker is gone");
                                    break;
                                }
                            }
                            _ = shutdown.changed() => {}
                        }
                    }
                    Ok(None) => {}
                    // 該当フレームのみ破棄して継続
                    Err(e) => log::warn!(target: target.as_str(), "Dropping frame: {}", e),
                }
            }
            Some(Ok(Message::Close(frame))) => {
                log::info!(target: target.as_str(), "Server closed connection: {:?}", frame);
                break;
            }
            Some(Ok(other)) => {
                log::debug!(target: target.as_str(), "Ignoring non-binary message: {:?}", other);
            }
            Some(Err(e)) => {
                log::error!(target: target.as_str(), "WebSocket read error: {}", e);
                break;
            }
            None => {
                log::info!(target: target.as_str(), "WebSocket stream ended");
                break;
            }
        }
    }

    shared.close();

    if let Some(mut sink) = shared.writer.lock().await.take() {
        match timeout(SOCKET_CLOSE_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::debug!(target: target.as_str(), "Error while closing socket: {}", e)
            }
            Err(_) => log::warn!(target: target.as_str(), "Timed out closing socket"),
        }
    }
}

/// ディスパッチループ
///
/// 受信順を保つため、1接続につき1タスクで順番に処理する
async fn dispatch_loop(
    mut queue: mpsc::Receiver<StructuredResponse>,
    dispatcher: EventDispatcher,
    events: mpsc::UnboundedSender<LiveEvent>,
    handle: ConnectionHandle,
) {
    while let Some(response) = queue.recv().await {
        if dispatcher.forward(&response, &events, &handle) {
            break;
        }
    }
}

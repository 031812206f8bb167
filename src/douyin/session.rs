//! ライブセッション
//!
//! 1つの公開ルームIDについて、ルーム解決 → 接続 → 停止 をまとめて扱う。

use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::StreamConnection;
use super::errors::LiveError;
use super::resolver::RoomResolver;
use super::signer::SignatureProvider;
use super::state::ConnectionState;
use super::types::{LiveEvent, Session};
use crate::config::ClientConfig;

/// セッションごとのログターゲット
///
/// ホスト側で `douyin_live::live::<id>` 単位にフィルタできる
pub fn log_target_for(public_id: u64) -> String {
    format!("douyin_live::live::{}", public_id)
}

/// 接続済みのライブセッション
pub struct LiveSession {
    session: Session,
    connection: StreamConnection,
}

impl LiveSession {
    /// ルームを解決して接続し、イベントの受信側を返す
    ///
    /// ルーム解決・署名・ハンドシェイクのいずれかが失敗した場合はエラーを返す（再試行なし）
    pub async fn start(
        public_id: u64,
        config: &ClientConfig,
        signer: Arc<dyn SignatureProvider>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LiveEvent>), LiveError> {
        let log_target = log_target_for(public_id);
        log::info!(target: log_target.as_str(), "Starting live session {}", public_id);

        let resolver = RoomResolver::new(config, &log_target)?;
        let session = resolver.resolve(public_id).await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = StreamConnection::new(config, signer, log_target);
        connection.connect(&session, events_tx).await?;

        Ok((
            Self {
                session,
                connection,
            },
            events_rx,
        ))
    }

    pub fn public_id(&self) -> u64 {
        self.session.public_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// 配信終了・切断・停止していなければtrue
    pub fn is_active(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// セッションを停止（冪等）
    pub async fn stop(&self) {
        self.connection.stop().await;
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("public_id", &self.session.public_id)
            .field("internal_room_id", &self.session.internal_room_id)
            .field("state", &self.state())
            .finish()
    }
}

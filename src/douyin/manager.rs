//! コレクタマネージャ
//!
//! 同時に接続するライブは1つだけ。別のライブを開始すると現在のセッションを停止してから切り替える。

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::errors::LiveError;
use super::session::{log_target_for, LiveSession};
use super::signer::{ScriptSigner, SignatureProvider};
use super::state::ConnectionState;
use super::types::LiveEvent;
use crate::config::ClientConfig;

pub struct CollectorManager {
    config: ClientConfig,
    signer: Arc<dyn SignatureProvider>,
    /// 現在のセッション
    current: Mutex<Option<LiveSession>>,
}

impl CollectorManager {
    pub fn new(config: ClientConfig, signer: Arc<dyn SignatureProvider>) -> Self {
        Self {
            config,
            signer,
            current: Mutex::new(None),
        }
    }

    /// 設定の `sign_command` を署名プロバイダとして使う
    pub fn from_config(config: ClientConfig) -> Result<Self, LiveError> {
        let signer = ScriptSigner::from_command(&config.sign_command)?;
        Ok(Self::new(config, Arc::new(signer)))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// ライブへの接続を開始
    ///
    /// 同じIDで接続中なら `AlreadyConnected`。
    /// 別のIDの場合、または前回のセッションが終了済みの場合は置き換える。
    pub async fn start(
        &self,
        public_id: u64,
    ) -> Result<mpsc::UnboundedReceiver<LiveEvent>, LiveError> {
        let mut current = self.current.lock().await;

        if let Some(session) = current.as_ref() {
            if session.public_id() == public_id && session.is_active() {
                log::warn!(
                    target: log_target_for(public_id).as_str(),
                    "Live {} is already connected",
                    public_id
                );
                return Err(LiveError::AlreadyConnected(public_id));
            }
        }

        if let Some(previous) = current.take() {
            log::info!(
                target: log_target_for(previous.public_id()).as_str(),
                "Switching from live {} to {}",
                previous.public_id(),
                public_id
            );
            previous.stop().await;
        }

        let (session, events) =
            LiveSession::start(public_id, &self.config, Arc::clone(&self.signer)).await?;
        *current = Some(session);

        Ok(events)
    }

    /// 現在のセッションを停止して破棄
    ///
    /// この関数は冪等であり、複数回呼び出しても安全です。
    pub async fn shutdown(&self) {
        let Some(session) = self.current.lock().await.take() else {
            log::debug!(target: "douyin_live::manager", "No live session to stop");
            return;
        };
        session.stop().await;
        log::info!(
            target: log_target_for(session.public_id()).as_str(),
            "Live session {} stopped",
            session.public_id()
        );
    }

    /// 現在の公開ルームID
    pub async fn current_public_id(&self) -> Option<u64> {
        self.current.lock().await.as_ref().map(|s| s.public_id())
    }

    /// 現在の接続状態（セッションが無ければ`None`）
    pub async fn state(&self) -> Option<ConnectionState> {
        self.current.lock().await.as_ref().map(|s| s.state())
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == Some(ConnectionState::Streaming)
    }
}

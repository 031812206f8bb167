use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

/// 接続状態
///
/// `Idle → Connecting → Streaming → Closed` の順に遷移する。
/// `Closed` は終端で、どの状態からでもエラーまたは停止で到達する。
/// 自動再接続はしないため `Closed` から戻る遷移はない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    Closed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Streaming => 2,
            ConnectionState::Closed => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Streaming,
            _ => ConnectionState::Closed,
        }
    }
}

/// スレッドセーフな接続状態
///
/// 読み取りタスク・ディスパッチタスク・呼び出し元から同時に参照・更新される
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Idle.as_u8()),
        }
    }

    /// 現在の状態を取得
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `from` の場合のみ `to` へ遷移する
    ///
    /// 遷移できなかった場合は実際の状態を`Err`で返す
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }

    /// `Closed` へ遷移し、直前の状態を返す
    pub fn close(&self) -> ConnectionState {
        ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Closed.as_u8(), Ordering::SeqCst),
        )
    }

    pub fn is_closed(&self) -> bool {
        self.get() == ConnectionState::Closed
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

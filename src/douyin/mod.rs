//! 抖音ライブ イベント収集モジュール
//!
//! ルーム解決 → 署名 → WebSocket接続 → フレームデコード → イベント配信 の一連の処理を提供する。

pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod manager;
pub mod proto;
pub mod resolver;
pub mod session;
pub mod signer;
pub mod state;
pub mod types;

#[cfg(test)]
mod test_support;

pub use connection::{ConnectionHandle, StreamConnection};
pub use errors::{CodecError, LiveError};
pub use manager::CollectorManager;
pub use resolver::RoomResolver;
pub use session::LiveSession;
pub use signer::{ScriptSigner, SignRequest, SignatureProvider};
pub use state::ConnectionState;
pub use types::{EventData, LiveEvent, MessageMethod, Session};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveError {
    // --- 通信 ---
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket connect failed: {0}")]
    Connect(String),

    #[error("Connection is not open")]
    NotConnected,

    // --- ルーム解決 ---
    #[error("ttwid cookie not found in response")]
    SessionCookieMissing,

    #[error("roomId not found in live room page")]
    RoomIdNotFound,

    // --- 署名 ---
    #[error("Signature provider failed: {0}")]
    SignatureProvider(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // --- フレーム・メッセージ ---
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to decode {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: prost::DecodeError,
    },

    // --- セッション管理 ---
    #[error("Already connected to live {0}")]
    AlreadyConnected(u64),

    #[error("Invalid connection state: {0}")]
    InvalidState(String),
}

/// フレームのデコード・解凍エラー
///
/// いずれも該当フレームのみを破棄し、接続は維持する
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed push frame: {0}")]
    MalformedEnvelope(#[source] prost::DecodeError),

    #[error("Failed to decompress payload: {0}")]
    DecompressError(#[source] std::io::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(#[source] prost::DecodeError),
}

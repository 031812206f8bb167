//! フレームプロトコル
//!
//! 外側のPushFrame → gzip解凍 → Response の順にデコードし、
//! 必要に応じてackを返送する。ソケット自体は持たず、送信は `FrameSender` 経由で行う。

use async_trait::async_trait;
use chrono::FixedOffset;
use flate2::read::GzDecoder;
use prost::Message as _;
use std::io::Read;
use tokio::sync::mpsc::UnboundedSender;

use super::errors::{CodecError, LiveError};
use super::proto::{HeadersList, PushFrame, Response};
use super::types::{AckEvent, EventData, LiveEvent, MessageMethod};
use crate::util::format_now;

/// gzipマジックバイト
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const COMPRESS_TYPE_HEADER: &str = "compress_type";
const COMPRESS_TYPE_GZIP: &str = "gzip";

/// フレームの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Data,
    Ack,
}

impl PayloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadType::Data => "msg",
            PayloadType::Ack => "ack",
        }
    }

    fn from_wire(raw: &str) -> Self {
        if raw == "ack" {
            PayloadType::Ack
        } else {
            PayloadType::Data
        }
    }
}

/// 外側のフレーム（ソケットからの1回の読み取りに対応）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub log_id: u64,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub compressed: bool,
}

/// レスポンス内の個別メッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubMessage {
    pub method: String,
    pub payload: Vec<u8>,
}

/// 解凍・デコード済みのレスポンス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredResponse {
    /// 受信順
    pub messages: Vec<SubMessage>,
    pub need_ack: bool,
    /// ackでそのまま返送する不透明データ
    pub internal_ext: Vec<u8>,
    pub cursor: String,
    pub fetch_interval: u64,
    pub now: u64,
}

/// バイト列をEnvelopeにデコード
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let frame = PushFrame::decode(bytes).map_err(CodecError::MalformedEnvelope)?;

    let gzip_header = frame
        .headers_list
        .iter()
        .any(|h| h.key == COMPRESS_TYPE_HEADER && h.value == COMPRESS_TYPE_GZIP);
    let compressed = gzip_header || frame.payload.starts_with(&GZIP_MAGIC);

    Ok(Envelope {
        log_id: frame.log_id,
        payload_type: PayloadType::from_wire(&frame.payload_type),
        payload: frame.payload,
        compressed,
    })
}

/// Envelopeをバイト列にエンコード
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    let headers_list = if envelope.compressed {
        vec![HeadersList {
            key: COMPRESS_TYPE_HEADER.to_string(),
            value: COMPRESS_TYPE_GZIP.to_string(),
        }]
    } else {
        Vec::new()
    };

    let frame = PushFrame {
        log_id: envelope.log_id,
        payload_type: envelope.payload_type.as_str().to_string(),
        payload: envelope.payload.clone(),
        headers_list,
        ..PushFrame::default()
    };
    frame.encode_to_vec()
}

/// gzip解凍
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(payload);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(CodecError::DecompressError)?;
    Ok(decompressed)
}

/// 解凍済みバイト列をレスポンスにデコード
pub fn decode_response(bytes: &[u8]) -> Result<StructuredResponse, CodecError> {
    let response = Response::decode(bytes).map_err(CodecError::MalformedResponse)?;

    Ok(StructuredResponse {
        messages: response
            .messages_list
            .into_iter()
            .map(|m| SubMessage {
                method: m.method,
                payload: m.payload,
            })
            .collect(),
        need_ack: response.need_ack,
        internal_ext: response.internal_ext,
        cursor: response.cursor,
        fetch_interval: response.fetch_interval,
        now: response.now,
    })
}

/// ackフレームを組み立てる（`need_ack` がfalseなら`None`）
///
/// ackはサブメッセージ単位ではなくフレーム単位
pub fn build_ack(envelope: &Envelope, response: &StructuredResponse) -> Option<Envelope> {
    if !response.need_ack {
        return None;
    }
    Some(Envelope {
        log_id: envelope.log_id,
        payload_type: PayloadType::Ack,
        payload: response.internal_ext.clone(),
        compressed: false,
    })
}

/// ackなどのバイナリフレーム送信手段
#[async_trait]
pub trait FrameSender: Send + Sync {
    async fn send_frame(&self, data: Vec<u8>) -> Result<(), LiveError>;
}

/// フレーム処理
pub struct FrameCodec {
    offset: FixedOffset,
    log_target: String,
}

impl FrameCodec {
    pub fn new(offset: FixedOffset, log_target: impl Into<String>) -> Self {
        Self {
            offset,
            log_target: log_target.into(),
        }
    }

    /// 受信フレームを1件処理する
    ///
    /// デコードに成功したデータフレームのレスポンスを返す。ack種別のフレームは`None`。
    /// ack送信の失敗はログのみで、レスポンスは通常どおり返す。
    pub async fn handle_frame(
        &self,
        raw: &[u8],
        sender: &dyn FrameSender,
        events: &UnboundedSender<LiveEvent>,
    ) -> Result<Option<StructuredResponse>, CodecError> {
        let envelope = decode_envelope(raw)?;

        if envelope.payload_type == PayloadType::Ack {
            log::debug!(target: self.log_target.as_str(), "Ignoring inbound ack frame (logId: {})", envelope.log_id);
            return Ok(None);
        }

        let response = if envelope.compressed {
            decode_response(&decompress(&envelope.payload)?)?
        } else {
            decode_response(&envelope.payload)?
        };

        if let Some(ack) = build_ack(&envelope, &response) {
            match sender.send_frame(encode_envelope(&ack)).await {
                Ok(()) => {
                    log::debug!(target: self.log_target.as_str(), "ACK sent (logId: {})", ack.log_id);
                    let event = LiveEvent::new(
                        MessageMethod::Room,
                        None,
                        Some(format_now(self.offset)),
                        EventData::AckSent(AckEvent {
                            log_id: ack.log_id,
                        }),
                    );
                    if events.send(event).is_err() {
                        log::debug!(target: self.log_target.as_str(), "Event receiver dropped");
                    }
                }
                Err(e) => {
                    log::warn!(target: self.log_target.as_str(), "Failed to send ACK (logId: {}): {}", ack.log_id, e);
                }
            }
        }

        Ok(Some(response))
    }
}

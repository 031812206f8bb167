//! テスト用のフレーム組み立てヘルパー

use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message as _;
use std::io::Write;

use super::proto;

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn sub_message(method: &str, payload: &[u8]) -> proto::Message {
    proto::Message {
        method: method.to_string(),
        payload: payload.to_vec(),
        ..proto::Message::default()
    }
}

pub fn response_bytes(messages: Vec<proto::Message>, need_ack: bool, internal_ext: &[u8]) -> Vec<u8> {
    proto::Response {
        messages_list: messages,
        need_ack,
        internal_ext: internal_ext.to_vec(),
        now: 1_700_000_000_000,
        ..proto::Response::default()
    }
    .encode_to_vec()
}

/// サーバーから届く形式（gzip圧縮 + compress_typeヘッダ）のデータフレーム
pub fn data_frame(log_id: u64, response: Vec<u8>) -> Vec<u8> {
    proto::PushFrame {
        log_id,
        payload_type: "msg".to_string(),
        payload_encoding: "pb".to_string(),
        headers_list: vec![proto::HeadersList {
            key: "compress_type".to_string(),
            value: "gzip".to_string(),
        }],
        payload: gzip(&response),
        ..proto::PushFrame::default()
    }
    .encode_to_vec()
}

pub fn user(id: u64, nick_name: &str) -> proto::User {
    proto::User {
        id,
        nick_name: nick_name.to_string(),
        ..proto::User::default()
    }
}

pub fn common(room_id: u64, create_time: u64) -> proto::Common {
    proto::Common {
        room_id,
        create_time,
        ..proto::Common::default()
    }
}

pub fn chat_payload(user_id: u64, nick_name: &str, content: &str, event_time: u64) -> Vec<u8> {
    proto::ChatMessage {
        common: Some(common(1, 0)),
        user: Some(user(user_id, nick_name)),
        content: content.to_string(),
        event_time,
        ..proto::ChatMessage::default()
    }
    .encode_to_vec()
}

pub fn control_payload(room_id: u64, status: i32) -> Vec<u8> {
    proto::ControlMessage {
        common: Some(common(room_id, 0)),
        status,
    }
    .encode_to_vec()
}

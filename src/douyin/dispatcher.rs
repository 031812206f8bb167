//! イベントディスパッチャ
//!
//! `SubMessage.method` からデコーダを引き、型付きの `LiveEvent` に変換する。
//! デコーダ表は全セッションで共有する読み取り専用のマップ。

use chrono::{DateTime, FixedOffset, TimeZone};
use once_cell::sync::Lazy;
use prost::Message as _;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

use super::codec::{StructuredResponse, SubMessage};
use super::errors::LiveError;
use super::proto;
use super::types::{
    ChatEvent, ControlEvent, EmojiChatEvent, EventData, FansclubEvent, Gender, GiftEvent,
    LikeEvent, LiveEvent, MemberEvent, MessageMethod, RankEntry, RoomEvent, RoomRankEvent,
    RoomStatsEvent, RoomUserSeqEvent, SocialEvent, UserInfo,
};
use crate::util::format_event_time;

/// デコード時の表示設定
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    pub offset: FixedOffset,
}

impl RenderContext {
    /// 作成時刻（UNIX秒）から (時刻, 表示文字列) を作る。0は欠落扱い
    fn times(&self, epoch_secs: u64) -> (Option<DateTime<FixedOffset>>, Option<String>) {
        let created_at = i64::try_from(epoch_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(|secs| self.offset.timestamp_opt(secs, 0).single());
        (created_at, format_event_time(epoch_secs, self.offset))
    }

    fn event(&self, method: MessageMethod, epoch_secs: u64, data: EventData) -> LiveEvent {
        let (created_at, event_time) = self.times(epoch_secs);
        LiveEvent::new(method, created_at, event_time, data)
    }
}

type DecodeFn = fn(&[u8], &RenderContext) -> Result<LiveEvent, prost::DecodeError>;

// methodタグ → デコーダ
static DECODERS: Lazy<HashMap<&'static str, DecodeFn>> = Lazy::new(|| {
    let mut decoders: HashMap<&'static str, DecodeFn> = HashMap::new();
    decoders.insert(MessageMethod::Chat.as_str(), decode_chat);
    decoders.insert(MessageMethod::Gift.as_str(), decode_gift);
    decoders.insert(MessageMethod::Member.as_str(), decode_member);
    decoders.insert(MessageMethod::Like.as_str(), decode_like);
    decoders.insert(MessageMethod::Social.as_str(), decode_social);
    decoders.insert(MessageMethod::RoomUserSeq.as_str(), decode_room_user_seq);
    decoders.insert(MessageMethod::Fansclub.as_str(), decode_fansclub);
    decoders.insert(MessageMethod::Control.as_str(), decode_control);
    decoders.insert(MessageMethod::EmojiChat.as_str(), decode_emoji_chat);
    decoders.insert(MessageMethod::RoomStats.as_str(), decode_room_stats);
    decoders.insert(MessageMethod::Room.as_str(), decode_room);
    decoders.insert(MessageMethod::RoomRank.as_str(), decode_room_rank);
    decoders
});

/// ディスパッチャが接続を閉じるための操作
pub trait ConnectionControl: Send + Sync {
    fn close(&self);
}

/// イベントディスパッチャ
pub struct EventDispatcher {
    context: RenderContext,
    log_target: String,
}

impl EventDispatcher {
    pub fn new(offset: FixedOffset, log_target: impl Into<String>) -> Self {
        Self {
            context: RenderContext { offset },
            log_target: log_target.into(),
        }
    }

    /// メッセージ1件をデコード
    ///
    /// 未登録のmethodは`Ok(None)`
    pub fn decode(&self, message: &SubMessage) -> Result<Option<LiveEvent>, LiveError> {
        let Some(decoder) = DECODERS.get(message.method.as_str()) else {
            return Ok(None);
        };
        decoder(&message.payload, &self.context)
            .map(Some)
            .map_err(|source| LiveError::Decode {
                method: message.method.clone(),
                source,
            })
    }

    /// レスポンス内の全メッセージを受信順にイベントへ変換
    ///
    /// 失敗したメッセージと未知のメッセージは読み飛ばす
    pub fn dispatch(&self, response: &StructuredResponse) -> Vec<LiveEvent> {
        response
            .messages
            .iter()
            .filter_map(|message| self.decode_logged(message))
            .collect()
    }

    /// レスポンスをデコードしてシンクへ送る
    ///
    /// 配信終了イベントを送った時点で接続を閉じ、残りのメッセージは破棄する。
    /// 配信終了を検知した場合は`true`を返す。
    pub fn forward(
        &self,
        response: &StructuredResponse,
        events: &UnboundedSender<LiveEvent>,
        connection: &dyn ConnectionControl,
    ) -> bool {
        for message in &response.messages {
            let Some(event) = self.decode_logged(message) else {
                continue;
            };
            let room_ended = event.is_room_ended();

            if events.send(event).is_err() {
                log::debug!(target: self.log_target.as_str(), "Event receiver dropped");
            }

            if room_ended {
                log::info!(target: self.log_target.as_str(), "Live room ended, closing connection");
                connection.close();
                return true;
            }
        }
        false
    }

    fn decode_logged(&self, message: &SubMessage) -> Option<LiveEvent> {
        match self.decode(message) {
            Ok(Some(event)) => {
                log::debug!(target: self.log_target.as_str(), "{}", event.result);
                Some(event)
            }
            Ok(None) => {
                log::debug!(target: self.log_target.as_str(), "UnknownMessage: {}", message.method);
                None
            }
            Err(e) => {
                log::warn!(target: self.log_target.as_str(), "{}", e);
                None
            }
        }
    }
}

fn user_info(user: Option<&proto::User>) -> UserInfo {
    user.map(|u| UserInfo {
        id: u.id,
        nick_name: u.nick_name.clone(),
    })
    .unwrap_or_default()
}

fn create_time(common: Option<&proto::Common>) -> u64 {
    common.map(|c| c.create_time).unwrap_or_default()
}

fn room_id(common: Option<&proto::Common>) -> u64 {
    common.map(|c| c.room_id).unwrap_or_default()
}

fn decode_chat(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::ChatMessage::decode(payload)?;
    // eventTimeが無ければcommonの作成時刻
    let time = if msg.event_time != 0 {
        msg.event_time
    } else {
        create_time(msg.common.as_ref())
    };
    Ok(ctx.event(
        MessageMethod::Chat,
        time,
        EventData::Chat(ChatEvent {
            user: user_info(msg.user.as_ref()),
            content: msg.content,
        }),
    ))
}

fn decode_gift(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::GiftMessage::decode(payload)?;
    let gift_id = match msg.gift_id {
        0 => msg.gift.as_ref().map(|g| g.id).unwrap_or_default(),
        id => id,
    };
    Ok(ctx.event(
        MessageMethod::Gift,
        create_time(msg.common.as_ref()),
        EventData::Gift(GiftEvent {
            user: user_info(msg.user.as_ref()),
            to_user: user_info(msg.to_user.as_ref()),
            gift_id,
            gift_name: msg.gift.map(|g| g.name).unwrap_or_default(),
            combo_count: msg.combo_count,
            repeat_count: msg.repeat_count,
        }),
    ))
}

fn decode_member(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::MemberMessage::decode(payload)?;
    let gender = Gender::from_raw(msg.user.as_ref().map(|u| u.gender).unwrap_or(u32::MAX));
    Ok(ctx.event(
        MessageMethod::Member,
        create_time(msg.common.as_ref()),
        EventData::Member(MemberEvent {
            user: user_info(msg.user.as_ref()),
            gender,
            member_count: msg.member_count,
        }),
    ))
}

fn decode_like(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::LikeMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::Like,
        create_time(msg.common.as_ref()),
        EventData::Like(LikeEvent {
            user: user_info(msg.user.as_ref()),
            count: msg.count,
            total: msg.total,
        }),
    ))
}

fn decode_social(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::SocialMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::Social,
        create_time(msg.common.as_ref()),
        EventData::Social(SocialEvent {
            user: user_info(msg.user.as_ref()),
            follow_count: msg.follow_count,
        }),
    ))
}

fn decode_room_user_seq(
    payload: &[u8],
    ctx: &RenderContext,
) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::RoomUserSeqMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::RoomUserSeq,
        create_time(msg.common.as_ref()),
        EventData::RoomUserSeq(RoomUserSeqEvent {
            current: msg.total,
            total_pv: msg.total_pv_for_anchor,
            total_user: msg.total_user,
        }),
    ))
}

fn decode_fansclub(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::FansclubMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::Fansclub,
        create_time(msg.common_info.as_ref()),
        EventData::Fansclub(FansclubEvent {
            user: user_info(msg.user.as_ref()),
            fansclub_type: msg.r#type,
            content: msg.content,
        }),
    ))
}

fn decode_control(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::ControlMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::Control,
        create_time(msg.common.as_ref()),
        EventData::Control(ControlEvent {
            room_id: room_id(msg.common.as_ref()),
            status: msg.status,
        }),
    ))
}

fn decode_emoji_chat(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::EmojiChatMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::EmojiChat,
        create_time(msg.common.as_ref()),
        EventData::EmojiChat(EmojiChatEvent {
            user: user_info(msg.user.as_ref()),
            emoji_id: msg.emoji_id,
            default_content: msg.default_content,
        }),
    ))
}

fn decode_room_stats(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::RoomStatsMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::RoomStats,
        create_time(msg.common.as_ref()),
        EventData::RoomStats(RoomStatsEvent {
            display_long: msg.display_long,
            display_value: msg.display_value,
            total: msg.total,
        }),
    ))
}

fn decode_room(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::RoomMessage::decode(payload)?;
    Ok(ctx.event(
        MessageMethod::Room,
        create_time(msg.common.as_ref()),
        EventData::Room(RoomEvent {
            room_id: room_id(msg.common.as_ref()),
            content: msg.content,
        }),
    ))
}

fn decode_room_rank(payload: &[u8], ctx: &RenderContext) -> Result<LiveEvent, prost::DecodeError> {
    let msg = proto::RoomRankMessage::decode(payload)?;
    let ranks = msg
        .ranks_list
        .iter()
        .enumerate()
        .map(|(i, rank)| RankEntry {
            rank: i + 1,
            user: user_info(rank.user.as_ref()),
            score: rank.score_str.clone(),
        })
        .collect();
    Ok(ctx.event(
        MessageMethod::RoomRank,
        create_time(msg.common.as_ref()),
        EventData::RoomRank(RoomRankEvent { ranks }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::douyin::test_support::{chat_payload, common, control_payload, user};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct CountingControl {
        closed: AtomicUsize,
    }

    impl ConnectionControl for CountingControl {
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(FixedOffset::east_opt(8 * 3600).unwrap(), "test")
    }

    fn sub(method: MessageMethod, payload: Vec<u8>) -> SubMessage {
        SubMessage {
            method: method.as_str().to_string(),
            payload,
        }
    }

    fn response(messages: Vec<SubMessage>) -> StructuredResponse {
        StructuredResponse {
            messages,
            need_ack: false,
            internal_ext: Vec::new(),
            cursor: String::new(),
            fetch_interval: 0,
            now: 0,
        }
    }

    #[test]
    fn test_registry_covers_all_methods() {
        for method in MessageMethod::ALL {
            assert!(DECODERS.contains_key(method.as_str()), "{}", method);
        }
        assert_eq!(DECODERS.len(), MessageMethod::ALL.len());
    }

    #[test]
    fn test_chat_message() {
        let event = dispatcher()
            .decode(&sub(
                MessageMethod::Chat,
                chat_payload(42, "Alice", "hi", 1_700_000_000),
            ))
            .unwrap()
            .unwrap();

        assert_eq!(event.method, MessageMethod::Chat);
        assert_eq!(event.event_time.as_deref(), Some("2023-11-15T06:13:20"));
        assert_eq!(event.created_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(event.result.contains("42"));
        assert!(event.result.contains("Alice"));
        assert!(event.result.contains("hi"));
        assert!(event.result.contains("2023-11-15T06:13:20"));
    }

    #[test]
    fn test_chat_without_time() {
        let event = dispatcher()
            .decode(&sub(MessageMethod::Chat, chat_payload(42, "Alice", "hi", 0)))
            .unwrap()
            .unwrap();
        assert!(event.event_time.is_none());
        assert!(event.created_at.is_none());
        assert_eq!(event.result, "【聊天消息】[ 42 ] Alice : hi");
    }

    #[test]
    fn test_gift_message() {
        let payload = proto::GiftMessage {
            common: Some(common(1, 1_700_000_000)),
            user: Some(user(1, "Alice")),
            to_user: Some(user(2, "Host")),
            combo_count: 5,
            gift: Some(proto::GiftStruct {
                id: 463,
                name: "小心心".to_string(),
                ..proto::GiftStruct::default()
            }),
            ..proto::GiftMessage::default()
        }
        .encode_to_vec();

        let event = dispatcher()
            .decode(&sub(MessageMethod::Gift, payload))
            .unwrap()
            .unwrap();
        match &event.data {
            EventData::Gift(gift) => {
                assert_eq!(gift.gift_id, 463);
                assert_eq!(gift.gift_name, "小心心");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(event.result.ends_with("Alice 给 Host 送出了 小心心 X 5连击"));
    }

    #[test]
    fn test_member_gender() {
        let mut member = user(7, "Bob");
        member.gender = 1;
        let payload = proto::MemberMessage {
            common: None,
            user: Some(member),
            member_count: 10,
        }
        .encode_to_vec();

        let event = dispatcher()
            .decode(&sub(MessageMethod::Member, payload))
            .unwrap()
            .unwrap();
        assert_eq!(event.result, "【进场消息】[ 7 ][ 男 ] Bob 进入了直播间");
    }

    #[test]
    fn test_fansclub_uses_common_info() {
        let payload = proto::FansclubMessage {
            common_info: Some(common(1, 1_700_000_000)),
            content: "joined".to_string(),
            ..proto::FansclubMessage::default()
        }
        .encode_to_vec();

        let event = dispatcher()
            .decode(&sub(MessageMethod::Fansclub, payload))
            .unwrap()
            .unwrap();
        assert_eq!(event.event_time.as_deref(), Some("2023-11-15T06:13:20"));
        assert!(event.result.ends_with("【粉丝团消息】 joined"));
    }

    #[test]
    fn test_room_rank_order() {
        let payload = proto::RoomRankMessage {
            common: None,
            ranks_list: vec![
                proto::RoomRank {
                    user: Some(user(1, "first")),
                    score_str: "300".to_string(),
                },
                proto::RoomRank {
                    user: Some(user(2, "second")),
                    score_str: "200".to_string(),
                },
            ],
        }
        .encode_to_vec();

        let event = dispatcher()
            .decode(&sub(MessageMethod::RoomRank, payload))
            .unwrap()
            .unwrap();
        match event.data {
            EventData::RoomRank(rank) => {
                assert_eq!(rank.ranks.len(), 2);
                assert_eq!(rank.ranks[0].rank, 1);
                assert_eq!(rank.ranks[1].user.nick_name, "second");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    fn decode_one(method: MessageMethod, payload: Vec<u8>) -> LiveEvent {
        let event = dispatcher().decode(&sub(method, payload)).unwrap().unwrap();
        assert_eq!(event.method, method);
        event
    }

    #[test]
    fn test_like_message() {
        let payload = proto::LikeMessage {
            common: None,
            count: 15,
            total: 1024,
            user: Some(user(3, "Carol")),
        }
        .encode_to_vec();

        let event = decode_one(MessageMethod::Like, payload);
        assert_eq!(event.result, "【点赞消息】【Carol】 点了 15 个赞");
        match event.data {
            EventData::Like(like) => assert_eq!(like.total, 1024),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_social_message() {
        let payload = proto::SocialMessage {
            user: Some(user(4, "Dave")),
            follow_count: 88,
            ..proto::SocialMessage::default()
        }
        .encode_to_vec();

        let event = decode_one(MessageMethod::Social, payload);
        assert_eq!(event.result, "【关注消息】[ 4 ] Dave 关注了主播");
    }

    #[test]
    fn test_room_user_seq_message() {
        let payload = proto::RoomUserSeqMessage {
            total: 321,
            total_user: 5000,
            total_pv_for_anchor: "1.2万".to_string(),
            ..proto::RoomUserSeqMessage::default()
        }
        .encode_to_vec();

        let event = decode_one(MessageMethod::RoomUserSeq, payload);
        assert_eq!(event.result, "【统计消息】当前观看人数: 321 , 累计观看人数: 1.2万");
        match event.data {
            EventData::RoomUserSeq(seq) => assert_eq!(seq.total_user, 5000),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emoji_chat_message() {
        let payload = proto::EmojiChatMessage {
            common: None,
            user: Some(user(5, "Eve")),
            emoji_id: 9001,
            default_content: "[比心]".to_string(),
        }
        .encode_to_vec();

        let event = decode_one(MessageMethod::EmojiChat, payload);
        assert_eq!(
            event.result,
            "【聊天表情包ID】 9001,user：Eve,defaultContent:[比心]"
        );
    }

    #[test]
    fn test_room_stats_message() {
        let payload = proto::RoomStatsMessage {
            display_long: "本场点赞 3万".to_string(),
            display_value: 30000,
            total: 30000,
            ..proto::RoomStatsMessage::default()
        }
        .encode_to_vec();

        let event = decode_one(MessageMethod::RoomStats, payload);
        assert_eq!(event.result, "【直播间统计消息】本场点赞 3万");
    }

    #[test]
    fn test_room_message() {
        let payload = proto::RoomMessage {
            common: Some(common(7_312_345_678_901_234_567, 1_700_000_000)),
            content: "welcome".to_string(),
        }
        .encode_to_vec();

        let event = decode_one(MessageMethod::Room, payload);
        assert_eq!(
            event.result,
            "2023-11-15T06:13:20 【直播间消息】直播间id: 7312345678901234567"
        );
        match event.data {
            EventData::Room(room) => assert_eq!(room.content, "welcome"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let result = dispatcher().decode(&sub(MessageMethod::Chat, b"\x0a\xff".to_vec()));
        match result {
            Err(LiveError::Decode { method, .. }) => assert_eq!(method, "WebcastChatMessage"),
            other => panic!("unexpected result: {:?}", other.map(|e| e.map(|e| e.result))),
        }
    }

    #[test]
    fn test_unknown_and_broken_messages_are_skipped() {
        let events = dispatcher().dispatch(&response(vec![
            SubMessage {
                method: "WebcastInRoomBannerMessage".to_string(),
                payload: b"whatever".to_vec(),
            },
            sub(MessageMethod::Chat, b"\x0a\xff".to_vec()),
            sub(MessageMethod::Chat, chat_payload(42, "Alice", "hi", 0)),
        ]));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method, MessageMethod::Chat);
    }

    #[test]
    fn test_forward_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let control = CountingControl::default();
        let ended = dispatcher().forward(
            &response(vec![
                sub(MessageMethod::Chat, chat_payload(1, "a", "first", 0)),
                sub(MessageMethod::Chat, chat_payload(2, "b", "second", 0)),
            ]),
            &tx,
            &control,
        );

        assert!(!ended);
        assert_eq!(control.closed.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().unwrap().result.ends_with("first"));
        assert!(rx.try_recv().unwrap().result.ends_with("second"));
    }

    #[test]
    fn test_room_ended_closes_connection() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let control = CountingControl::default();
        let ended = dispatcher().forward(
            &response(vec![
                sub(MessageMethod::Control, control_payload(123, 3)),
                sub(MessageMethod::Chat, chat_payload(1, "a", "late", 0)),
            ]),
            &tx,
            &control,
        );

        assert!(ended);
        assert_eq!(control.closed.load(Ordering::SeqCst), 1);

        let event = rx.try_recv().unwrap();
        assert!(event.is_room_ended());
        assert!(event.result.contains("123"));
        // 終了後のメッセージは送らない
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_other_control_status_keeps_connection() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let control = CountingControl::default();
        let ended = dispatcher().forward(
            &response(vec![sub(MessageMethod::Control, control_payload(123, 1))]),
            &tx,
            &control,
        );

        assert!(!ended);
        assert_eq!(control.closed.load(Ordering::SeqCst), 0);
        assert!(!rx.try_recv().unwrap().is_room_ended());
    }
}

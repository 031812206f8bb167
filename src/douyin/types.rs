use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fmt;

/// 解決済みのセッション情報
///
/// `session_cookie` と `internal_room_id` はセッション開始時に一度だけ解決され、以後変更されない
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub public_id: u64,
    pub session_cookie: String,
    pub internal_room_id: String,
}

/// サブメッセージの種別タグ（`Message.method`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageMethod {
    #[serde(rename = "WebcastChatMessage")]
    Chat,
    #[serde(rename = "WebcastGiftMessage")]
    Gift,
    #[serde(rename = "WebcastMemberMessage")]
    Member,
    #[serde(rename = "WebcastLikeMessage")]
    Like,
    #[serde(rename = "WebcastSocialMessage")]
    Social,
    #[serde(rename = "WebcastRoomUserSeqMessage")]
    RoomUserSeq,
    #[serde(rename = "WebcastFansclubMessage")]
    Fansclub,
    #[serde(rename = "WebcastControlMessage")]
    Control,
    #[serde(rename = "WebcastEmojiChatMessage")]
    EmojiChat,
    #[serde(rename = "WebcastRoomStatsMessage")]
    RoomStats,
    #[serde(rename = "WebcastRoomMessage")]
    Room,
    #[serde(rename = "WebcastRoomRankMessage")]
    RoomRank,
}

impl MessageMethod {
    pub const ALL: [MessageMethod; 12] = [
        MessageMethod::Chat,
        MessageMethod::Gift,
        MessageMethod::Member,
        MessageMethod::Like,
        MessageMethod::Social,
        MessageMethod::RoomUserSeq,
        MessageMethod::Fansclub,
        MessageMethod::Control,
        MessageMethod::EmojiChat,
        MessageMethod::RoomStats,
        MessageMethod::Room,
        MessageMethod::RoomRank,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageMethod::Chat => "WebcastChatMessage",
            MessageMethod::Gift => "WebcastGiftMessage",
            MessageMethod::Member => "WebcastMemberMessage",
            MessageMethod::Like => "WebcastLikeMessage",
            MessageMethod::Social => "WebcastSocialMessage",
            MessageMethod::RoomUserSeq => "WebcastRoomUserSeqMessage",
            MessageMethod::Fansclub => "WebcastFansclubMessage",
            MessageMethod::Control => "WebcastControlMessage",
            MessageMethod::EmojiChat => "WebcastEmojiChatMessage",
            MessageMethod::RoomStats => "WebcastRoomStatsMessage",
            MessageMethod::Room => "WebcastRoomMessage",
            MessageMethod::RoomRank => "WebcastRoomRankMessage",
        }
    }

    /// タグ文字列から種別を取得（未知のタグは`None`）
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == method)
    }
}

impl fmt::Display for MessageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// シンクへ送られるイベント
///
/// UI・ログ側は `method` でルーティングし、`result` をそのまま表示に使う
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub method: MessageMethod,
    /// メッセージ埋め込みの作成時刻（欠落時は`None`）
    pub created_at: Option<DateTime<FixedOffset>>,
    /// 表示用の作成時刻
    pub event_time: Option<String>,
    /// 表示用の整形済み文字列
    pub result: String,
    pub data: EventData,
}

impl LiveEvent {
    /// 時刻と本文から表示用文字列を組み立ててイベントを作成
    pub fn new(
        method: MessageMethod,
        created_at: Option<DateTime<FixedOffset>>,
        event_time: Option<String>,
        data: EventData,
    ) -> Self {
        let body = data.render();
        let result = match &event_time {
            Some(time) => format!("{} {}", time, body),
            None => body,
        };
        Self {
            method,
            created_at,
            event_time,
            result,
            data,
        }
    }

    /// 配信終了（Control status=3）かどうか
    pub fn is_room_ended(&self) -> bool {
        matches!(&self.data, EventData::Control(control) if control.is_room_ended())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventData {
    Chat(ChatEvent),
    Gift(GiftEvent),
    Member(MemberEvent),
    Like(LikeEvent),
    Social(SocialEvent),
    RoomUserSeq(RoomUserSeqEvent),
    Fansclub(FansclubEvent),
    Control(ControlEvent),
    EmojiChat(EmojiChatEvent),
    RoomStats(RoomStatsEvent),
    Room(RoomEvent),
    RoomRank(RoomRankEvent),
    /// ack送信の確認レコード（チャットイベントではない）
    AckSent(AckEvent),
}

impl EventData {
    /// 時刻を除いた表示用本文
    pub fn render(&self) -> String {
        match self {
            EventData::Chat(e) => format!(
                "【聊天消息】[ {} ] {} : {}",
                e.user.id, e.user.nick_name, e.content
            ),
            EventData::Gift(e) => format!(
                "【礼物消息】{} 给 {} 送出了 {} X {}连击",
                e.user.nick_name, e.to_user.nick_name, e.gift_name, e.combo_count
            ),
            EventData::Member(e) => format!(
                "【进场消息】[ {} ][ {} ] {} 进入了直播间",
                e.user.id,
                e.gender.label(),
                e.user.nick_name
            ),
            EventData::Like(e) => format!(
                "【点赞消息】【{}】 点了 {} 个赞",
                e.user.nick_name, e.count
            ),
            EventData::Social(e) => format!(
                "【关注消息】[ {} ] {} 关注了主播",
                e.user.id, e.user.nick_name
            ),
            EventData::RoomUserSeq(e) => format!(
                "【统计消息】当前观看人数: {} , 累计观看人数: {}",
                e.current, e.total_pv
            ),
            EventData::Fansclub(e) => format!("【粉丝团消息】 {}", e.content),
            EventData::Control(e) if e.is_room_ended() => {
                format!("【直播间消息】直播间 {} 已结束", e.room_id)
            }
            EventData::Control(e) => format!(
                "【直播间消息】直播间 {} 状态变更: {}",
                e.room_id, e.status
            ),
            EventData::EmojiChat(e) => format!(
                "【聊天表情包ID】 {},user：{},defaultContent:{}",
                e.emoji_id, e.user.nick_name, e.default_content
            ),
            EventData::RoomStats(e) => format!("【直播间统计消息】{}", e.display_long),
            EventData::Room(e) => format!("【直播间消息】直播间id: {}", e.room_id),
            EventData::RoomRank(e) => {
                let ranks: Vec<String> = e
                    .ranks
                    .iter()
                    .map(|r| format!("[{}] {} {}", r.rank, r.user.id, r.user.nick_name))
                    .collect();
                format!("【直播间排行榜消息】{}", ranks.join(", "))
            }
            EventData::AckSent(e) => format!("ACK sent successfully. (logId: {})", e.log_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: u64,
    pub nick_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    Unknown,
}

impl Gender {
    /// プロトコル上の数値から変換（0:女, 1:男, それ以外:unknown）
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Gender::Female,
            1 => Gender::Male,
            _ => Gender::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Gender::Female => "女",
            Gender::Male => "男",
            Gender::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub user: UserInfo,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftEvent {
    pub user: UserInfo,
    pub to_user: UserInfo,
    pub gift_id: u64,
    pub gift_name: String,
    pub combo_count: u64,
    pub repeat_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    pub user: UserInfo,
    pub gender: Gender,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeEvent {
    pub user: UserInfo,
    pub count: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialEvent {
    pub user: UserInfo,
    pub follow_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUserSeqEvent {
    /// 現在の視聴者数
    pub current: i64,
    /// 累計視聴者数（表示用文字列）
    pub total_pv: String,
    pub total_user: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FansclubEvent {
    pub user: UserInfo,
    pub fansclub_type: i32,
    pub content: String,
}

/// 配信状態の制御メッセージ
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEvent {
    pub room_id: u64,
    pub status: i32,
}

impl ControlEvent {
    /// 配信終了を示すステータス
    pub const STATUS_ROOM_ENDED: i32 = 3;

    pub fn is_room_ended(&self) -> bool {
        self.status == Self::STATUS_ROOM_ENDED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmojiChatEvent {
    pub user: UserInfo,
    pub emoji_id: i64,
    pub default_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatsEvent {
    pub display_long: String,
    pub display_value: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub room_id: u64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    /// 1始まりの順位
    pub rank: usize,
    pub user: UserInfo,
    pub score: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRankEvent {
    pub ranks: Vec<RankEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEvent {
    pub log_id: u64,
}

// =============================================================================
// 共通設定・定数モジュール
// =============================================================================
// 抖音ライブ接続で使用する固定値と、ホスト側から差し替え可能な設定を定義
// =============================================================================

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::time::Duration;

/// ライブルームのランディングページ
pub const LIVE_BASE_URL: &str = "https://live.douyin.com/";

/// HTTP/WebSocket共通のUser-Agent
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// プッシュ用WebSocket URLテンプレート
///
/// `{room_id}` は2箇所（`wss_push_room_id` と `room_id`）とも内部ルームIDで置換される。
pub const SOCKET_URL_TEMPLATE: &str = concat!(
    "wss://webcast5-ws-web-hl.douyin.com/webcast/im/push/v2/?app_name=douyin_web",
    "&version_code=180800&webcast_sdk_version=1.0.14-beta.0",
    "&update_version_code=1.0.14-beta.0&compress=gzip&device_platform=web&cookie_enabled=true",
    "&screen_width=1536&screen_height=864&browser_language=zh-CN&browser_platform=Win32",
    "&browser_name=Mozilla",
    "&browser_version=5.0%20(Windows%20NT%2010.0;%20Win64;%20x64)%20AppleWebKit/537.36%20(KHTML,",
    "%20like%20Gecko)%20Chrome/126.0.0.0%20Safari/537.36",
    "&browser_online=true&tz_name=Asia/Shanghai",
    "&cursor=d-1_u-1_fh-7392091211001140287_t-1721106114633_r-1",
    "&internal_ext=internal_src:dim|wss_push_room_id:{room_id}|wss_push_did:7319483754668557238",
    "|first_req_ms:1721106114541|fetch_time:1721106114633|seq:1|wss_info:0-1721106114633-0-0|",
    "wrds_v:7392094459690748497",
    "&host=https://live.douyin.com&aid=6383&live_id=1&did_rule=3&endpoint=live_pc&support_wrds=1",
    "&user_unique_id=7319483754668557238&im_path=/webcast/im/fetch/&identity=audience",
    "&need_persist_msg_count=15&insert_task_id=&live_reason=&room_id={room_id}&heartbeatDuration=0"
);

/// URLテンプレート内の置換プレースホルダ
pub const ROOM_ID_PLACEHOLDER: &str = "{room_id}";

/// ルームページ取得時に付与する固定nonce（`__ac_nonce`）
pub const AC_NONCE: &str = "0123407cc00a9e438deb4";

/// msTokenの長さ
pub const MS_TOKEN_LENGTH: usize = 107;

/// msToken生成に使う文字集合
pub const MS_TOKEN_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789=_";

/// イベント時刻の表示フォーマット
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// HTTPリクエストのデフォルトタイムアウト（秒）
///
/// ルーム解決の2回のGETで使用。リトライはしないため、
/// 応答がない場合はこの時間で打ち切って呼び出し元にエラーを返す。
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// 配信タイムゾーン（Asia/Shanghai, UTC+8）
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// デコード待ちレスポンスのキュー上限
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 256;

/// クライアント設定
///
/// 全フィールドにデフォルト値があるため、ホスト側は必要な項目だけ上書きすればよい。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub live_base_url: String,
    pub user_agent: String,
    pub socket_url_template: String,
    pub http_timeout_secs: u64,
    pub dispatch_queue_capacity: usize,
    pub utc_offset_secs: i32,
    /// 署名プロセスの起動コマンド（先頭がプログラム、残りが引数）
    pub sign_command: Vec<String>,
}

impl ClientConfig {
    /// HTTPリクエストのタイムアウト（Duration）
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// イベント時刻の表示に使うタイムゾーン
    ///
    /// 範囲外のオフセットが設定された場合はUTC+8にフォールバックする
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs)
            .or_else(|| FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS))
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            live_base_url: LIVE_BASE_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
            socket_url_template: SOCKET_URL_TEMPLATE.to_string(),
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            dispatch_queue_capacity: DEFAULT_DISPATCH_QUEUE_CAPACITY,
            utc_offset_secs: DEFAULT_UTC_OFFSET_SECS,
            sign_command: vec!["node".to_string(), "./sign.js".to_string()],
        }
    }
}

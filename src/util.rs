use chrono::{FixedOffset, TimeZone, Utc};

use crate::config::EVENT_TIME_FORMAT;

/// Cookie・トークンをマスキングしてログ出力用の文字列を生成
///
/// 最初の4文字と最後の4文字のみを表示し、中間を***でマスキング
///
/// # Examples
/// ```
/// use douyin_live_lib::util::mask_secret;
///
/// let masked = mask_secret("1%7CabcdefGHIJ123456");
/// assert_eq!(masked, "1%7C***3456");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    if len <= 8 {
        // 短い値は全体をマスク
        return "***".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[len - 4..].iter().collect();
    format!("{}***{}", prefix, suffix)
}

/// メッセージに埋め込まれた作成時刻（UNIX秒）を表示用文字列に変換
///
/// 0 はフィールド欠落として扱い、`None` を返す
pub fn format_event_time(epoch_secs: u64, offset: FixedOffset) -> Option<String> {
    if epoch_secs == 0 {
        return None;
    }
    let secs = i64::try_from(epoch_secs).ok()?;
    offset
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format(EVENT_TIME_FORMAT).to_string())
}

/// 現在時刻を表示用文字列に変換（マイクロ秒まで）
pub fn format_now(offset: FixedOffset) -> String {
    Utc::now()
        .with_timezone(&offset)
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

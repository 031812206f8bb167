//! ルームリゾルバ
//!
//! 公開ルームID（URL上の数字）から、匿名セッションCookie（`ttwid`）と
//! 内部ルームIDを取得する。リトライはせず、失敗はそのまま呼び出し元に返す。

use rand::Rng;
use regex::Regex;
use reqwest::header::COOKIE;
use reqwest::Client;
use std::sync::OnceLock;

use super::errors::LiveError;
use super::types::Session;
use crate::config::{ClientConfig, AC_NONCE, MS_TOKEN_ALPHABET, MS_TOKEN_LENGTH};
use crate::util::mask_secret;

/// セッションCookie名
const SESSION_COOKIE_NAME: &str = "ttwid";

// 正規表現のシングルトン（OnceLockで初回のみコンパイル）
static ROOM_ID_RE: OnceLock<Regex> = OnceLock::new();

/// ページ内のJSON文字列に埋め込まれた `roomId\":\"<数字>\"` を抽出する
fn get_room_id_regex() -> &'static Regex {
    ROOM_ID_RE.get_or_init(|| {
        Regex::new(r#"roomId\\":\\"(\d+)\\""#).expect("Failed to compile roomId regex")
    })
}

/// ルームリゾルバ
pub struct RoomResolver {
    client: Client,
    base_url: String,
    log_target: String,
}

impl RoomResolver {
    /// 新しいリゾルバを作成
    ///
    /// # Errors
    /// HTTPクライアントのビルドに失敗した場合にエラーを返す
    pub fn new(config: &ClientConfig, log_target: impl Into<String>) -> Result<Self, LiveError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.live_base_url.trim_end_matches('/').to_string(),
            log_target: log_target.into(),
        })
    }

    /// 公開IDをセッション情報に解決
    pub async fn resolve(&self, public_id: u64) -> Result<Session, LiveError> {
        let session_cookie = self.fetch_session_cookie().await?;
        let internal_room_id = self.fetch_room_id(public_id, &session_cookie).await?;

        log::info!(
            target: self.log_target.as_str(),
            "Resolved live {} -> room {} (ttwid: {})",
            public_id,
            internal_room_id,
            mask_secret(&session_cookie)
        );

        Ok(Session {
            public_id,
            session_cookie,
            internal_room_id,
        })
    }

    /// ランディングページへの未認証GETで `ttwid` Cookieを取得
    async fn fetch_session_cookie(&self) -> Result<String, LiveError> {
        let url = format!("{}/", self.base_url);
        log::debug!(target: self.log_target.as_str(), "Fetching session cookie: {}", url);

        let response = self.client.get(&url).send().await?;

        let ttwid = response
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE_NAME)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty());

        ttwid.ok_or_else(|| {
            log::error!(
                target: self.log_target.as_str(),
                "No {} cookie in response (status: {})",
                SESSION_COOKIE_NAME,
                response.status()
            );
            LiveError::SessionCookieMissing
        })
    }

    /// ルームページのHTMLから内部ルームIDを取得
    async fn fetch_room_id(&self, public_id: u64, ttwid: &str) -> Result<String, LiveError> {
        let url = format!("{}/{}", self.base_url, public_id);
        let cookie = format!(
            "ttwid={}; msToken={}; __ac_nonce={}",
            ttwid,
            generate_ms_token(),
            AC_NONCE
        );

        log::debug!(target: self.log_target.as_str(), "Fetching live room page: {}", url);

        let body = self
            .client
            .get(&url)
            .header(COOKIE, cookie)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Self::extract_room_id(&body).ok_or_else(|| {
            log::error!(target: self.log_target.as_str(), "roomId not found in page of live {}", public_id);
            LiveError::RoomIdNotFound
        })
    }

    /// 内部ルームIDを抽出（事前コンパイル済み正規表現を使用）
    fn extract_room_id(html: &str) -> Option<String> {
        get_room_id_regex()
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl std::fmt::Debug for RoomResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomResolver")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// 使い捨てのmsTokenを生成（固定文字集合から一様ランダム）
pub fn generate_ms_token() -> String {
    let mut rng = rand::thread_rng();
    (0..MS_TOKEN_LENGTH)
        .map(|_| MS_TOKEN_ALPHABET[rng.gen_range(0..MS_TOKEN_ALPHABET.len())] as char)
        .collect()
}

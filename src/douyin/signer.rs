//! 接続URLの署名
//!
//! 署名アルゴリズム自体は外部プロバイダに任せ、ここでは
//! URLパラメータの正規化・ダイジェスト計算・プロバイダとのJSON入出力のみを扱う。

use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::errors::LiveError;

/// 署名対象のパラメータ（この順で連結する）
pub const SIGN_PARAM_KEYS: [&str; 13] = [
    "live_id",
    "aid",
    "version_code",
    "webcast_sdk_version",
    "room_id",
    "sub_room_id",
    "sub_channel_id",
    "did_rule",
    "user_unique_id",
    "device_platform",
    "device_type",
    "ac",
    "identity",
];

/// プロバイダへのリクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignRequest {
    #[serde(rename = "X-MS-STUB")]
    pub stub: String,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "X-Bogus")]
    x_bogus: String,
}

/// 署名プロバイダ
///
/// サブプロセス・ネイティブ実装・テスト用スタブを差し替えられるようにトレイトで抽象化している
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    /// ダイジェストから署名トークンを取得
    async fn sign(&self, request: &SignRequest) -> Result<String, LiveError>;
}

/// URLのクエリから署名対象パラメータを固定順で `key=value` 連結した文字列を作る
///
/// 欠落しているキーは空値として扱う。URL上の並び順には依存しない。
pub fn canonical_params(url: &str) -> Result<String, LiveError> {
    let parsed = Url::parse(url).map_err(|e| LiveError::InvalidUrl(e.to_string()))?;
    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

    let params: Vec<String> = SIGN_PARAM_KEYS
        .iter()
        .map(|key| {
            let value = pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect();

    Ok(params.join(","))
}

/// 正規化パラメータのMD5（16進32文字）からリクエストを作る
pub fn build_sign_request(url: &str) -> Result<SignRequest, LiveError> {
    let params = canonical_params(url)?;
    let digest = Md5::digest(params.as_bytes());
    Ok(SignRequest {
        stub: format!("{:x}", digest),
    })
}

/// URLに署名を付与して返す（`signature` は常に末尾）
pub async fn sign_url(provider: &dyn SignatureProvider, url: &str) -> Result<String, LiveError> {
    let request = build_sign_request(url)?;
    let signature = provider.sign(&request).await?;
    Ok(format!("{}&signature={}", url, signature))
}

/// 外部プロセスを呼び出す署名プロバイダ
///
/// リクエストJSONを最後の引数として渡し、標準出力のJSONから `X-Bogus` を読む
#[derive(Debug, Clone)]
pub struct ScriptSigner {
    program: String,
    args: Vec<String>,
}

impl ScriptSigner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `["node", "./sign.js"]` 形式のコマンド列から作成
    pub fn from_command(command: &[String]) -> Result<Self, LiveError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            LiveError::SignatureProvider("sign command is empty".to_string())
        })?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl SignatureProvider for ScriptSigner {
    async fn sign(&self, request: &SignRequest) -> Result<String, LiveError> {
        let payload = serde_json::to_string(request)
            .map_err(|e| LiveError::SignatureProvider(e.to_string()))?;

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&payload)
            .env("LANG", "en_US.UTF-8")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                LiveError::SignatureProvider(format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            return Err(LiveError::SignatureProvider(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let response: SignResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| LiveError::SignatureProvider(format!("malformed output: {}", e)))?;

        Ok(response.x_bogus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "wss://example.com/push/?app_name=douyin_web&live_id=1&aid=6383&version_code=180800&webcast_sdk_version=1.0.14-beta.0&room_id=7312345678901234567&did_rule=3&user_unique_id=7319483754668557238&device_platform=web&identity=audience";

    const PERMUTED_URL: &str = "wss://example.com/push/?identity=audience&device_platform=web&user_unique_id=7319483754668557238&did_rule=3&room_id=7312345678901234567&webcast_sdk_version=1.0.14-beta.0&version_code=180800&aid=6383&live_id=1&app_name=douyin_web";

    struct FixedSigner;

    #[async_trait]
    impl SignatureProvider for FixedSigner {
        async fn sign(&self, request: &SignRequest) -> Result<String, LiveError> {
            assert_eq!(request.stub.len(), 32);
            Ok("DFSzswVOabc".to_string())
        }
    }

    #[test]
    fn test_canonical_params() {
        assert_eq!(
            canonical_params(URL).unwrap(),
            "live_id=1,aid=6383,version_code=180800,webcast_sdk_version=1.0.14-beta.0,\
             room_id=7312345678901234567,sub_room_id=,sub_channel_id=,did_rule=3,\
             user_unique_id=7319483754668557238,device_platform=web,device_type=,ac=,\
             identity=audience"
        );
    }

    #[test]
    fn test_digest_ignores_query_order() {
        assert_eq!(
            build_sign_request(URL).unwrap(),
            build_sign_request(PERMUTED_URL).unwrap()
        );
    }

    #[test]
    fn test_digest_is_md5_hex() {
        let request = build_sign_request(URL).unwrap();
        assert_eq!(request.stub.len(), 32);
        assert!(request.stub.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // 全キー欠落時は "live_id=,aid=,..." のMD5
        let empty = build_sign_request("wss://example.com/").unwrap();
        let expected = format!(
            "{:x}",
            Md5::digest(
                SIGN_PARAM_KEYS
                    .iter()
                    .map(|k| format!("{}=", k))
                    .collect::<Vec<_>>()
                    .join(",")
                    .as_bytes()
            )
        );
        assert_eq!(empty.stub, expected);
    }

    #[test]
    fn test_sign_request_json() {
        let request = SignRequest {
            stub: "0123456789abcdef0123456789abcdef".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"X-MS-STUB":"0123456789abcdef0123456789abcdef"}"#
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            canonical_params("not a url"),
            Err(LiveError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_url_appends_signature_last() {
        let signed = sign_url(&FixedSigner, URL).await.unwrap();
        assert!(signed.starts_with(URL));
        assert!(signed.ends_with("&signature=DFSzswVOabc"));
    }

    #[test]
    fn test_from_empty_command() {
        assert!(matches!(
            ScriptSigner::from_command(&[]),
            Err(LiveError::SignatureProvider(_))
        ));
    }

    #[cfg(unix)]
    mod script {
        use super::*;
        use std::io::Write;

        /// 受け取った引数を検査してJSONを返すスクリプトを作成
        fn write_script(body: &str) -> tempfile::NamedTempFile {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "{}", body).unwrap();
            file
        }

        fn signer_for(script: &tempfile::NamedTempFile) -> ScriptSigner {
            ScriptSigner::new(
                "sh",
                vec![script.path().to_string_lossy().into_owned()],
            )
        }

        #[tokio::test]
        async fn test_script_signer() {
            let script = write_script(
                r#"case "$1" in
  '{"X-MS-STUB":"'*) printf '{"X-Bogus":"DFSzswVOtoken"}' ;;
  *) exit 2 ;;
esac"#,
            );
            let request = build_sign_request(URL).unwrap();
            let token = signer_for(&script).sign(&request).await.unwrap();
            assert_eq!(token, "DFSzswVOtoken");
        }

        #[tokio::test]
        async fn test_script_signer_non_zero_exit() {
            let script = write_script("echo boom >&2; exit 1");
            let request = build_sign_request(URL).unwrap();
            let result = signer_for(&script).sign(&request).await;
            assert!(matches!(result, Err(LiveError::SignatureProvider(_))));
        }

        #[tokio::test]
        async fn test_script_signer_malformed_output() {
            let script = write_script("printf 'not json'");
            let request = build_sign_request(URL).unwrap();
            let result = signer_for(&script).sign(&request).await;
            assert!(matches!(result, Err(LiveError::SignatureProvider(_))));
        }
    }
}

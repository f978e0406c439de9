use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;

/// トリガーハンドラが返すレスポンスの共通エンベロープ。
/// 成功時は`contests`、失敗時は`error`のみをシリアライズする。
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct AutomationResponse<T> {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub contests: Option<Vec<T>>,
    pub error: Option<String>,
}

impl<T: Serialize> AutomationResponse<T> {
    pub fn succeeded(kind: impl ToString, contests: Vec<T>) -> Self {
        AutomationResponse {
            success: true,
            timestamp: Utc::now(),
            kind: kind.to_string(),
            message: format!("Successfully processed {} contests", contests.len()),
            contests: Some(contests),
            error: None,
        }
    }

    pub fn failed(kind: impl ToString, error: String) -> Self {
        AutomationResponse {
            success: false,
            timestamp: Utc::now(),
            kind: kind.to_string(),
            message: String::from("Automation failed"),
            contests: None,
            error: Some(error),
        }
    }
}

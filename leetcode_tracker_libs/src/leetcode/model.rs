use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// コンテストの開催時間(秒)
pub const CONTEST_DURATION_SECOND: i64 = 90 * 60;

static CONTEST_NUMBER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Weekly Contest 461の開始日時(UTC)
static WEEKLY_BASE: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2025, 8, 3, 2, 30, 0).unwrap());
const WEEKLY_BASE_NUMBER: i64 = 461;

/// Biweekly Contestの起算日時(UTC)
static BIWEEKLY_BASE: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2019, 6, 1, 14, 30, 0).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContestType {
    Weekly,
    Biweekly,
}

impl fmt::Display for ContestType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ContestType::Weekly => write!(f, "weekly"),
            ContestType::Biweekly => write!(f, "biweekly"),
        }
    }
}

/// コンテスト一覧API(/contest/api/list/)のレスポンスに含まれるコンテスト情報
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContestInfo {
    pub title: String,
    pub title_slug: String,
    pub start_time: i64,
    pub duration: i64,
}

impl ContestInfo {
    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration
    }

    /// タイトルからコンテスト種別を判定するメソッド
    pub fn contest_type(&self) -> ContestType {
        if self.title.contains("Biweekly") {
            ContestType::Biweekly
        } else {
            ContestType::Weekly
        }
    }

    /// タイトルからコンテスト番号(ID)を抽出するメソッド
    pub fn contest_id(&self) -> Option<String> {
        CONTEST_NUMBER_PATTERN
            .find(&self.title)
            .map(|m| m.as_str().to_string())
    }
}

/// 現在時刻からWeekly Contestの番号を算出する関数
pub fn weekly_contest_number(now: DateTime<Utc>) -> i64 {
    WEEKLY_BASE_NUMBER + (now - *WEEKLY_BASE).num_weeks()
}

/// 現在時刻からBiweekly Contestの番号を算出する関数
pub fn biweekly_contest_number(now: DateTime<Utc>) -> i64 {
    (now - *BIWEEKLY_BASE).num_days() / 14 + 1
}

/// コンテスト一覧が取得できなかったときのフォールバック。
/// 日付計算だけで現在のサイクルのコンテスト情報を組み立てる。
pub fn current_contest(kind: ContestType, now: DateTime<Utc>) -> ContestInfo {
    let (number, start_time) = match kind {
        ContestType::Weekly => {
            let number = weekly_contest_number(now);
            let start = *WEEKLY_BASE + Duration::weeks(number - WEEKLY_BASE_NUMBER);
            (number, start)
        }
        ContestType::Biweekly => {
            let number = biweekly_contest_number(now);
            let start = *BIWEEKLY_BASE + Duration::weeks(2 * (number - 1));
            (number, start)
        }
    };

    let kind_label = match kind {
        ContestType::Weekly => "Weekly",
        ContestType::Biweekly => "Biweekly",
    };

    ContestInfo {
        title: format!("{} Contest {}", kind_label, number),
        title_slug: format!("{}-contest-{}", kind, number),
        start_time: start_time.timestamp(),
        duration: CONTEST_DURATION_SECOND,
    }
}

/// ランキングAPI(/contest/api/ranking/)の1ページ分のレスポンス
#[derive(Debug, Deserialize)]
pub struct RankingPage {
    #[serde(default)]
    pub total_rank: Vec<RankingEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingEntry {
    pub username: String,
    pub rank: i32,
    pub score: i32,
    pub finish_time: i64,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Contest {
    pub contest_id: String,
    pub title: String,
    pub contest_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_participants: i32,
    pub data_fetched: bool,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetUser {
    pub leetcode_id: String,
    pub display_name: String,
    pub academic_year: Option<String>,
    pub department: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct UserContestResult {
    pub contest_id: String,
    pub leetcode_id: String,
    pub participated: bool,
    pub rank: Option<i32>,
    pub score: Option<i32>,
    pub finish_time: Option<i64>,
    pub matched_username: Option<String>,
}

use crate::types::tables::{Contest, TargetUser};
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use sqlx::{postgres::Postgres, FromRow, Pool};
use std::{cmp::Ordering, collections::HashMap};
use validator::Validate;

/// サマリに載せる直近のコンテスト数
const RECENT_CONTEST_COUNT: usize = 5;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ResultWithContest {
    pub contest_id: String,
    pub leetcode_id: String,
    pub participated: bool,
    pub rank: Option<i32>,
    pub score: Option<i32>,
    pub finish_time: Option<i64>,
    pub title: String,
    pub contest_type: String,
    pub start_time: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, PartialEq)]
pub struct UserStatistics {
    pub total_contests: usize,
    pub participated_count: usize,
    pub participation_rate: f64,
    pub avg_rank: Option<i64>,
    pub avg_score: Option<f64>,
    pub best_rank: Option<i32>,
    pub best_score: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: TargetUser,
    pub statistics: UserStatistics,
    pub recent_contests: Vec<ResultWithContest>,
}

#[derive(Debug, Serialize)]
pub struct SummaryMeta {
    pub total_users: usize,
    pub active_users: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardSummaryResponse {
    pub users: Vec<UserSummary>,
    pub meta: SummaryMeta,
}

/// ユーザごとのコンテスト参加統計を集計する関数
pub fn compute_statistics(results: &[ResultWithContest]) -> UserStatistics {
    let total_contests = results.len();
    let participated: Vec<&ResultWithContest> =
        results.iter().filter(|result| result.participated).collect();
    let participated_count = participated.len();

    let participation_rate = if total_contests > 0 {
        round2(participated_count as f64 / total_contests as f64 * 100.0)
    } else {
        0.0
    };

    let avg_rank = (participated_count > 0).then(|| {
        let sum: i64 = participated
            .iter()
            .map(|result| i64::from(result.rank.unwrap_or(0)))
            .sum();
        (sum as f64 / participated_count as f64).round() as i64
    });
    let avg_score = (participated_count > 0).then(|| {
        let sum: i64 = participated
            .iter()
            .map(|result| i64::from(result.score.unwrap_or(0)))
            .sum();
        round2(sum as f64 / participated_count as f64)
    });
    let best_rank = participated.iter().filter_map(|result| result.rank).min();
    let best_score = participated.iter().filter_map(|result| result.score).max();

    UserStatistics {
        total_contests,
        participated_count,
        participation_rate,
        avg_rank,
        avg_score,
        best_rank,
        best_score,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// リーダーボードの並び順。参加率の降順、同率なら平均順位の昇順、
/// どちらかに平均順位がなければ平均スコアの降順。
pub fn compare_statistics(a: &UserStatistics, b: &UserStatistics) -> Ordering {
    match b.participation_rate.partial_cmp(&a.participation_rate) {
        Some(Ordering::Equal) | None => {}
        Some(order) => return order,
    }

    match (a.avg_rank, b.avg_rank) {
        (Some(a_rank), Some(b_rank)) => a_rank.cmp(&b_rank),
        _ => {
            let a_score = a.avg_score.unwrap_or(0.0);
            let b_score = b.avg_score.unwrap_or(0.0);
            b_score.partial_cmp(&a_score).unwrap_or(Ordering::Equal)
        }
    }
}

pub async fn leaderboard_summary(
    Extension(pool): Extension<Pool<Postgres>>,
) -> Result<Json<LeaderboardSummaryResponse>, StatusCode> {
    let users = sqlx::query_as::<_, TargetUser>(
        r#"
        SELECT "leetcode_id", "display_name", "academic_year", "department", "section"
        FROM "target_users"
        ORDER BY "leetcode_id";
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("failed to fetch target users: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let rows = sqlx::query_as::<_, ResultWithContest>(
        r#"
        SELECT
            "r"."contest_id",
            "r"."leetcode_id",
            "r"."participated",
            "r"."rank",
            "r"."score",
            "r"."finish_time",
            "c"."title",
            "c"."contest_type",
            "c"."start_time"
        FROM "user_contest_results" AS "r"
        JOIN "contests" AS "c" ON "r"."contest_id" = "c"."contest_id";
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("failed to fetch contest results: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut grouped: HashMap<String, Vec<ResultWithContest>> = rows
        .into_iter()
        .map(|row| (row.leetcode_id.clone(), row))
        .into_group_map();

    let mut summaries: Vec<UserSummary> = users
        .into_iter()
        .map(|user| {
            let mut results = grouped.remove(&user.leetcode_id).unwrap_or_default();
            results.sort_by(|a, b| b.start_time.cmp(&a.start_time));

            let statistics = compute_statistics(&results);
            let recent_contests = results.into_iter().take(RECENT_CONTEST_COUNT).collect();

            UserSummary {
                user,
                statistics,
                recent_contests,
            }
        })
        .collect();
    summaries.sort_by(|a, b| compare_statistics(&a.statistics, &b.statistics));

    let meta = SummaryMeta {
        total_users: summaries.len(),
        active_users: summaries
            .iter()
            .filter(|summary| summary.statistics.participated_count > 0)
            .count(),
        timestamp: Utc::now(),
    };

    Ok(Json(LeaderboardSummaryResponse {
        users: summaries,
        meta,
    }))
}

#[derive(Debug, Deserialize, Validate, PartialEq, Eq)]
pub struct ContestLeaderboardParameter {
    /// 学年での絞り込み。"all"は絞り込みなしと同義。
    pub year: Option<String>,
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContestResultRow {
    pub leetcode_id: String,
    pub display_name: String,
    pub academic_year: Option<String>,
    pub section: Option<String>,
    pub participated: bool,
    pub rank: Option<i32>,
    pub score: Option<i32>,
    pub finish_time: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ContestResultCounts {
    pub total: usize,
    pub participated: usize,
    pub not_participated: usize,
}

#[derive(Debug, Serialize)]
pub struct ContestLeaderboardResponse {
    pub contest: Contest,
    pub summary: ContestResultCounts,
    pub results: Vec<ContestResultRow>,
}

pub async fn contest_leaderboard(
    Path(contest_id): Path<String>,
    Query(params): Query<ContestLeaderboardParameter>,
    Extension(pool): Extension<Pool<Postgres>>,
) -> Result<Json<ContestLeaderboardResponse>, StatusCode> {
    if let Err(e) = params.validate() {
        tracing::warn!("invalid contest leaderboard parameter: {:?}", e);
        return Err(StatusCode::BAD_REQUEST);
    }

    let contest = sqlx::query_as::<_, Contest>(
        r#"
        SELECT "contest_id", "title", "contest_type", "start_time", "end_time", "total_participants", "data_fetched"
        FROM "contests"
        WHERE "contest_id" = $1;
        "#,
    )
    .bind(&contest_id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("failed to fetch contest {}: {:?}", contest_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    let year = params.year.filter(|year| year != "all");
    let rows = sqlx::query_as::<_, ContestResultRow>(
        r#"
        SELECT
            "r"."leetcode_id",
            "u"."display_name",
            "u"."academic_year",
            "u"."section",
            "r"."participated",
            "r"."rank",
            "r"."score",
            "r"."finish_time"
        FROM "user_contest_results" AS "r"
        JOIN "target_users" AS "u" ON "r"."leetcode_id" = "u"."leetcode_id"
        WHERE "r"."contest_id" = $1 AND ($2::TEXT IS NULL OR "u"."academic_year" = $2)
        ORDER BY "r"."participated" DESC, "r"."rank" ASC NULLS LAST;
        "#,
    )
    .bind(&contest_id)
    .bind(&year)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("failed to fetch results of contest {}: {:?}", contest_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let participated = rows.iter().filter(|row| row.participated).count();
    let summary = ContestResultCounts {
        total: rows.len(),
        participated,
        not_participated: rows.len() - participated,
    };

    let results = match params.limit {
        Some(limit) => rows.into_iter().take(limit as usize).collect(),
        None => rows,
    };

    Ok(Json(ContestLeaderboardResponse {
        contest,
        summary,
        results,
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn result(participated: bool, rank: Option<i32>, score: Option<i32>, day: u32) -> ResultWithContest {
        ResultWithContest {
            contest_id: String::from("461"),
            leetcode_id: String::from("alice"),
            participated,
            rank,
            score,
            finish_time: participated.then_some(1754193000),
            title: String::from("Weekly Contest 461"),
            contest_type: String::from("weekly"),
            start_time: Utc.with_ymd_and_hms(2025, 8, day, 2, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_compute_statistics() {
        let results = vec![
            result(true, Some(100), Some(12), 3),
            result(true, Some(301), Some(18), 10),
            result(false, None, None, 17),
            result(false, None, None, 24),
        ];

        let statistics = compute_statistics(&results);

        assert_eq!(statistics.total_contests, 4);
        assert_eq!(statistics.participated_count, 2);
        assert_eq!(statistics.participation_rate, 50.0);
        assert_eq!(statistics.avg_rank, Some(201));
        assert_eq!(statistics.avg_score, Some(15.0));
        assert_eq!(statistics.best_rank, Some(100));
        assert_eq!(statistics.best_score, Some(18));
    }

    #[test]
    fn statistics_without_participation() {
        let results = vec![result(false, None, None, 3)];

        let statistics = compute_statistics(&results);

        assert_eq!(statistics.participation_rate, 0.0);
        assert_eq!(statistics.avg_rank, None);
        assert_eq!(statistics.avg_score, None);
        assert_eq!(statistics.best_rank, None);
        assert_eq!(statistics.best_score, None);
    }

    #[test]
    fn statistics_without_results() {
        let statistics = compute_statistics(&[]);

        assert_eq!(statistics.total_contests, 0);
        assert_eq!(statistics.participation_rate, 0.0);
    }

    #[test]
    fn test_compare_statistics() {
        let high_rate = compute_statistics(&[result(true, Some(500), Some(10), 3)]);
        let low_rate = compute_statistics(&[
            result(true, Some(10), Some(20), 3),
            result(false, None, None, 10),
        ]);

        // 参加率が高い方が先
        assert_eq!(compare_statistics(&high_rate, &low_rate), Ordering::Less);

        // 参加率が同じなら平均順位の昇順
        let better_rank = compute_statistics(&[result(true, Some(10), Some(20), 3)]);
        let worse_rank = compute_statistics(&[result(true, Some(500), Some(10), 3)]);
        assert_eq!(compare_statistics(&better_rank, &worse_rank), Ordering::Less);
    }

    #[test]
    fn test_parameter_validation() {
        let valid = ContestLeaderboardParameter {
            year: Some(String::from("2nd Year")),
            limit: Some(20),
        };
        assert!(valid.validate().is_ok());

        let invalid = ContestLeaderboardParameter {
            year: None,
            limit: Some(0),
        };
        assert!(invalid.validate().is_err());
    }
}

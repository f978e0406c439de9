use crate::{
    cmd::TriggerKind,
    types::tables::{TargetUser, UserContestResult},
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use leetcode_tracker_libs::leetcode::{
    client::{ContestApi, LeetCodeClient},
    model::{current_contest, ContestInfo, ContestType, RankingEntry},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sqlx::{postgres::Postgres, Pool};
use std::collections::HashMap;
use tokio::time::{self, Duration};

/// 終了からこの秒数以内のコンテストを処理対象とする
const RECENT_WINDOW_SECOND: i64 = 2 * 60 * 60;

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]").unwrap());

/// 1コンテスト分の処理結果。トリガーハンドラのレスポンスにそのまま載る。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContestSummary {
    pub contest_id: String,
    pub title: String,
    pub contest_type: ContestType,
    pub participants: usize,
    pub found_users: usize,
    pub not_found_users: usize,
    pub total_stored: usize,
}

pub struct ContestFetcher<'a, C> {
    pool: &'a Pool<Postgres>,
    client: C,
}

impl<'a> ContestFetcher<'a, LeetCodeClient> {
    pub fn new(pool: &'a Pool<Postgres>) -> Result<Self> {
        let client = LeetCodeClient::new("https://leetcode.com")
            .context("failed to create LeetCode client")?;
        Ok(ContestFetcher { pool, client })
    }
}

impl<'a, C> ContestFetcher<'a, C>
where
    C: ContestApi + Sync,
{
    pub fn with_client(pool: &'a Pool<Postgres>, client: C) -> Self {
        ContestFetcher { pool, client }
    }

    /// コンテストの取得からデータベースへの保存までの一連の処理を行うメソッド
    ///
    /// 個々のコンテストの失敗はそのコンテストの書き込みだけをロールバックし、
    /// 残りのコンテストの処理は継続する。全体として失敗になるのは
    /// コンテスト一覧の取得に失敗したときのみ。
    pub async fn run_automation(&self, kind: TriggerKind) -> Result<Vec<ContestSummary>> {
        tracing::info!("Start contest automation ({}).", kind);

        let targets = self.target_contests(kind).await?;
        if targets.is_empty() {
            tracing::info!("No recently finished contests found.");
            return Ok(Vec::new());
        }

        let mut processed: Vec<ContestSummary> = Vec::with_capacity(targets.len());
        for (i, contest) in targets.iter().enumerate() {
            if i > 0 {
                time::sleep(Duration::from_secs(2)).await;
            }

            match self.process_contest(contest).await {
                Ok(summary) => processed.push(summary),
                Err(e) => {
                    tracing::error!("failed to process contest {}: {:?}", contest.title, e);
                    continue;
                }
            }
        }

        tracing::info!("Automation complete. Processed {} contests.", processed.len());

        Ok(processed)
    }

    /// トリガー種別に応じて処理対象のコンテストを決定するメソッド
    pub async fn target_contests(&self, kind: TriggerKind) -> Result<Vec<ContestInfo>> {
        let contests = self
            .client
            .contest_list()
            .await
            .context("failed to fetch contest list from LeetCode")?;

        Ok(select_targets(&contests, kind, Utc::now()))
    }

    /// 1コンテスト分の取得・突き合わせ・保存を行うメソッド
    pub async fn process_contest(&self, contest: &ContestInfo) -> Result<ContestSummary> {
        tracing::info!("Processing contest {}.", contest.title);

        let contest_id = contest
            .contest_id()
            .with_context(|| format!("could not extract contest id from title {:?}", contest.title))?;

        let participants = self
            .client
            .contest_ranking(&contest.title_slug)
            .await
            .with_context(|| format!("failed to fetch ranking of {}", contest.title_slug))?;
        if participants.is_empty() {
            anyhow::bail!("no participants found for contest {}", contest.title_slug);
        }

        let targets = self.target_users().await?;
        let results = match_participants(&contest_id, &targets, &participants);
        let found_users = results.iter().filter(|r| r.participated).count();

        self.save(contest, &contest_id, participants.len() as i32, &results)
            .await?;

        tracing::info!(
            "Contest {} processed: {} participated, {} absent.",
            contest_id,
            found_users,
            results.len() - found_users
        );

        Ok(ContestSummary {
            contest_id,
            title: contest.title.clone(),
            contest_type: contest.contest_type(),
            participants: participants.len(),
            found_users,
            not_found_users: results.len() - found_users,
            total_stored: results.len(),
        })
    }

    async fn target_users(&self) -> Result<Vec<TargetUser>> {
        let users = sqlx::query_as::<_, TargetUser>(
            r#"
            SELECT "leetcode_id", "display_name", "academic_year", "department", "section"
            FROM "target_users"
            ORDER BY "leetcode_id";
            "#,
        )
        .fetch_all(self.pool)
        .await
        .context("failed to load target users")?;

        Ok(users)
    }

    /// コンテスト情報と結果行をデータベースへ保存するメソッド
    ///
    /// 1コンテスト分を1トランザクションで書き込む。途中でエラーが発生したら
    /// そのコンテストの行をすべてロールバックする。
    /// データの保存にMERGE INTO文(PostgreSQL 15から)を使用している。
    async fn save(
        &self,
        contest: &ContestInfo,
        contest_id: &str,
        total_participants: i32,
        results: &[UserContestResult],
    ) -> Result<()> {
        let start_time = Utc
            .timestamp_opt(contest.start_time, 0)
            .single()
            .with_context(|| format!("invalid contest start time {}", contest.start_time))?;
        let end_time = Utc
            .timestamp_opt(contest.end_time(), 0)
            .single()
            .with_context(|| format!("invalid contest end time {}", contest.end_time()))?;

        let mut tx = self.pool.begin().await.with_context(|| {
            let message = "failed to start transaction";
            tracing::error!(message);
            message
        })?;

        let result = sqlx::query(
            r#"
            MERGE INTO "contests"
            USING
                (VALUES($1, $2, $3, $4, $5, $6, TRUE)) AS "contest"("contest_id", "title", "contest_type", "start_time", "end_time", "total_participants", "data_fetched")
            ON
                "contests"."contest_id" = "contest"."contest_id"
            WHEN MATCHED THEN
                UPDATE SET (
                    "title",
                    "contest_type",
                    "start_time",
                    "end_time",
                    "total_participants",
                    "data_fetched"
                ) = (
                    "contest"."title",
                    "contest"."contest_type",
                    "contest"."start_time",
                    "contest"."end_time",
                    "contest"."total_participants",
                    "contest"."data_fetched"
                )
            WHEN NOT MATCHED THEN
                INSERT ("contest_id", "title", "contest_type", "start_time", "end_time", "total_participants", "data_fetched")
                VALUES ("contest"."contest_id", "contest"."title", "contest"."contest_type", "contest"."start_time", "contest"."end_time", "contest"."total_participants", "contest"."data_fetched");
            "#,
        )
        .bind(contest_id)
        .bind(&contest.title)
        .bind(contest.contest_type().to_string())
        .bind(start_time)
        .bind(end_time)
        .bind(total_participants)
        .execute(&mut tx)
        .await;

        if let Err(e) = result {
            let message = format!("an error occurred at saving contest {}: [{:?}]", contest_id, e);
            tracing::error!(message);
            tx.rollback().await?;
            anyhow::bail!(message);
        }

        for row in results.iter() {
            let result = sqlx::query(
                r#"
                MERGE INTO "user_contest_results"
                USING
                    (VALUES($1, $2, $3, $4, $5, $6, $7)) AS "result"("contest_id", "leetcode_id", "participated", "rank", "score", "finish_time", "matched_username")
                ON
                    "user_contest_results"."contest_id" = "result"."contest_id"
                    AND "user_contest_results"."leetcode_id" = "result"."leetcode_id"
                WHEN MATCHED THEN
                    UPDATE SET (
                        "participated",
                        "rank",
                        "score",
                        "finish_time",
                        "matched_username",
                        "updated_at"
                    ) = (
                        "result"."participated",
                        "result"."rank",
                        "result"."score",
                        "result"."finish_time",
                        "result"."matched_username",
                        NOW()
                    )
                WHEN NOT MATCHED THEN
                    INSERT ("contest_id", "leetcode_id", "participated", "rank", "score", "finish_time", "matched_username")
                    VALUES ("result"."contest_id", "result"."leetcode_id", "result"."participated", "result"."rank", "result"."score", "result"."finish_time", "result"."matched_username");
                "#,
            )
            .bind(&row.contest_id)
            .bind(&row.leetcode_id)
            .bind(&row.participated)
            .bind(&row.rank)
            .bind(&row.score)
            .bind(&row.finish_time)
            .bind(&row.matched_username)
            .execute(&mut tx)
            .await;

            if let Err(e) = result {
                let message = format!("an error occurred at saving {:?}: [{:?}]", row.leetcode_id, e);
                tracing::error!(message);
                tx.rollback().await?;
                anyhow::bail!(message);
            }
        }

        tx.commit().await?;
        tracing::info!(
            "{} result rows of contest {} successfully saved.",
            results.len(),
            contest_id
        );

        Ok(())
    }
}

/// コンテスト一覧から処理対象を選ぶ関数
///
/// 終了から規定時間以内のコンテストを対象とし、週次・隔週トリガーでは
/// 該当する種別に絞り込む。一覧から見つからなかった場合、週次・隔週トリガーは
/// 日付計算によるフォールバックで現在のサイクルのコンテストを対象にする。
/// 手動トリガーでは対象なしを成功(空)として扱う。
pub fn select_targets(
    contests: &[ContestInfo],
    kind: TriggerKind,
    now: DateTime<Utc>,
) -> Vec<ContestInfo> {
    let mut recent: Vec<ContestInfo> = contests
        .iter()
        .filter(|contest| {
            let since_end = now.timestamp() - contest.end_time();
            (0..=RECENT_WINDOW_SECOND).contains(&since_end)
        })
        .cloned()
        .collect();

    if let Some(cycle) = kind.cycle() {
        recent.retain(|contest| contest.contest_type() == cycle);
        if recent.is_empty() {
            tracing::warn!(
                "no recently finished {} contest in the list, falling back to date arithmetic",
                cycle
            );
            recent.push(current_contest(cycle, now));
        }
    }

    recent
}

/// ランキングの参加者一覧を追跡対象ユーザに突き合わせて結果行を作る関数
///
/// 追跡対象ユーザ1人につき必ず1行を返す。参加が確認できなかったユーザも
/// participated = falseの行として明示する。追跡対象に該当しない参加者は黙って捨てる。
pub fn match_participants(
    contest_id: &str,
    targets: &[TargetUser],
    participants: &[RankingEntry],
) -> Vec<UserContestResult> {
    let by_username: HashMap<String, &RankingEntry> = participants
        .iter()
        .map(|entry| (entry.username.to_lowercase(), entry))
        .collect();

    targets
        .iter()
        .map(|user| {
            let leetcode_id = user.leetcode_id.to_lowercase();
            let candidates = [
                leetcode_id.clone(),
                user.display_name.to_lowercase(),
                NON_ALPHANUMERIC.replace_all(&leetcode_id, "").into_owned(),
            ];

            let matched = candidates
                .iter()
                .filter(|candidate| !candidate.is_empty())
                .find_map(|candidate| by_username.get(candidate.as_str()));

            match matched {
                Some(entry) => UserContestResult {
                    contest_id: contest_id.to_string(),
                    leetcode_id: user.leetcode_id.clone(),
                    participated: true,
                    rank: Some(entry.rank),
                    score: Some(entry.score),
                    finish_time: Some(entry.finish_time),
                    matched_username: if entry.username != user.leetcode_id {
                        Some(entry.username.clone())
                    } else {
                        None
                    },
                },
                None => UserContestResult {
                    contest_id: contest_id.to_string(),
                    leetcode_id: user.leetcode_id.clone(),
                    participated: false,
                    rank: None,
                    score: None,
                    finish_time: None,
                    matched_username: None,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use leetcode_tracker_libs::leetcode::{
        client::LeetCodeError, model::CONTEST_DURATION_SECOND,
    };

    /// コンテスト一覧の取得自体に失敗するクライアント
    struct FailingListClient;

    #[async_trait]
    impl ContestApi for FailingListClient {
        async fn contest_list(&self) -> Result<Vec<ContestInfo>, LeetCodeError> {
            Err(LeetCodeError::UnexpectedError(String::from(
                "error response returned from contest list api: 503 Service Unavailable",
            )))
        }

        async fn contest_ranking(&self, _slug: &str) -> Result<Vec<RankingEntry>, LeetCodeError> {
            Ok(Vec::new())
        }
    }

    /// 一覧は返すがランキングの取得に失敗するクライアント
    struct FailingRankingClient {
        contests: Vec<ContestInfo>,
    }

    #[async_trait]
    impl ContestApi for FailingRankingClient {
        async fn contest_list(&self) -> Result<Vec<ContestInfo>, LeetCodeError> {
            Ok(self.contests.clone())
        }

        async fn contest_ranking(&self, slug: &str) -> Result<Vec<RankingEntry>, LeetCodeError> {
            Err(LeetCodeError::UnexpectedError(format!(
                "error response returned from ranking page 1 of {}: 403 Forbidden",
                slug
            )))
        }
    }

    fn lazy_pool() -> Pool<Postgres> {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost:5432/leetcode_tracker_test")
            .unwrap()
    }

    /// 終了直後のコンテストを組み立てるヘルパ
    fn just_finished_contest(title: &str, slug: &str) -> ContestInfo {
        ContestInfo {
            title: String::from(title),
            title_slug: String::from(slug),
            start_time: Utc::now().timestamp() - CONTEST_DURATION_SECOND - 60,
            duration: CONTEST_DURATION_SECOND,
        }
    }

    fn target(leetcode_id: &str, display_name: &str) -> TargetUser {
        TargetUser {
            leetcode_id: String::from(leetcode_id),
            display_name: String::from(display_name),
            academic_year: None,
            department: None,
            section: None,
        }
    }

    fn entry(username: &str, rank: i32) -> RankingEntry {
        RankingEntry {
            username: String::from(username),
            rank,
            score: rank * 3,
            finish_time: 1754193000,
        }
    }

    fn contest(title: &str, slug: &str, start_time: i64) -> ContestInfo {
        ContestInfo {
            title: String::from(title),
            title_slug: String::from(slug),
            start_time,
            duration: CONTEST_DURATION_SECOND,
        }
    }

    #[test]
    fn every_target_user_gets_exactly_one_row() {
        let targets = vec![target("alice", "Alice"), target("bob", "Bob")];
        let participants = vec![entry("alice", 10), entry("carol", 20), entry("dave", 30)];

        let results = match_participants("461", &targets, &participants);

        assert_eq!(results.len(), targets.len());
        assert!(results.iter().all(|r| r.contest_id == "461"));
    }

    #[test]
    fn unmatched_participants_are_dropped_silently() {
        // 参加者3人のうち追跡対象に該当するのは2人
        let targets = vec![
            target("alice", "Alice"),
            target("bob", "Bob"),
            target("eve", "Eve"),
        ];
        let participants = vec![entry("alice", 10), entry("bob", 25), entry("carol", 30)];

        let results = match_participants("461", &targets, &participants);

        let participated: Vec<&UserContestResult> =
            results.iter().filter(|r| r.participated).collect();
        assert_eq!(participated.len(), 2);
        assert!(results.iter().all(|r| r.leetcode_id != "carol"));

        let absent = results.iter().find(|r| r.leetcode_id == "eve").unwrap();
        assert!(!absent.participated);
        assert_eq!(absent.rank, None);
        assert_eq!(absent.score, None);
    }

    #[test]
    fn matches_by_display_name_and_normalization() {
        let targets = vec![target("alice_smith", "Alice Smith"), target("bob.k", "Bobby")];
        let participants = vec![entry("alicesmith", 5), entry("bobby", 7)];

        let results = match_participants("461", &targets, &participants);

        let alice = results.iter().find(|r| r.leetcode_id == "alice_smith").unwrap();
        assert!(alice.participated);
        assert_eq!(alice.matched_username, Some(String::from("alicesmith")));

        let bob = results.iter().find(|r| r.leetcode_id == "bob.k").unwrap();
        assert!(bob.participated);
        assert_eq!(bob.matched_username, Some(String::from("bobby")));
    }

    #[test]
    fn exact_match_keeps_matched_username_empty() {
        let targets = vec![target("alice", "Alice")];
        let participants = vec![entry("alice", 1)];

        let results = match_participants("461", &targets, &participants);

        assert_eq!(results[0].matched_username, None);
        assert_eq!(results[0].rank, Some(1));
    }

    #[test]
    fn select_targets_keeps_recently_finished_contests() {
        let now = Utc.with_ymd_and_hms(2025, 8, 3, 4, 30, 0).unwrap();
        let just_finished = contest(
            "Weekly Contest 461",
            "weekly-contest-461",
            Utc.with_ymd_and_hms(2025, 8, 3, 2, 30, 0).unwrap().timestamp(),
        );
        let last_week = contest(
            "Weekly Contest 460",
            "weekly-contest-460",
            Utc.with_ymd_and_hms(2025, 7, 27, 2, 30, 0).unwrap().timestamp(),
        );

        let selected = select_targets(
            &[just_finished.clone(), last_week],
            TriggerKind::Manual,
            now,
        );

        assert_eq!(selected, vec![just_finished]);
    }

    #[test]
    fn select_targets_filters_by_trigger_cycle() {
        let now = Utc.with_ymd_and_hms(2025, 8, 2, 16, 30, 0).unwrap();
        let weekly = contest(
            "Weekly Contest 461",
            "weekly-contest-461",
            Utc.with_ymd_and_hms(2025, 8, 2, 14, 0, 0).unwrap().timestamp(),
        );
        let biweekly = contest(
            "Biweekly Contest 162",
            "biweekly-contest-162",
            Utc.with_ymd_and_hms(2025, 8, 2, 14, 30, 0).unwrap().timestamp(),
        );

        let selected = select_targets(
            &[weekly, biweekly.clone()],
            TriggerKind::Biweekly,
            now,
        );

        assert_eq!(selected, vec![biweekly]);
    }

    #[test]
    fn select_targets_falls_back_to_date_arithmetic() {
        let now = Utc.with_ymd_and_hms(2025, 8, 10, 4, 30, 0).unwrap();

        let selected = select_targets(&[], TriggerKind::Weekly, now);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].title, "Weekly Contest 462");
    }

    #[test]
    fn select_targets_returns_empty_for_manual_trigger() {
        let now = Utc.with_ymd_and_hms(2025, 8, 10, 4, 30, 0).unwrap();

        let selected = select_targets(&[], TriggerKind::Manual, now);

        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn automation_fails_when_contest_list_is_unavailable() {
        let pool = lazy_pool();
        let fetcher = ContestFetcher::with_client(&pool, FailingListClient);

        let result = fetcher.run_automation(TriggerKind::Manual).await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("failed to fetch contest list"));
    }

    #[tokio::test]
    async fn failed_contest_is_skipped_without_failing_the_run() {
        let pool = lazy_pool();
        let client = FailingRankingClient {
            contests: vec![just_finished_contest(
                "Weekly Contest 470",
                "weekly-contest-470",
            )],
        };
        let fetcher = ContestFetcher::with_client(&pool, client);

        let processed = fetcher.run_automation(TriggerKind::Manual).await.unwrap();

        assert!(processed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_only_between_contests() {
        let pool = lazy_pool();
        let client = FailingRankingClient {
            contests: vec![
                just_finished_contest("Weekly Contest 470", "weekly-contest-470"),
                just_finished_contest("Biweekly Contest 166", "biweekly-contest-166"),
            ],
        };
        let fetcher = ContestFetcher::with_client(&pool, client);

        let start = time::Instant::now();
        let processed = fetcher.run_automation(TriggerKind::Manual).await.unwrap();

        assert!(processed.is_empty());
        // コンテスト2件で待機は間の1回分だけ
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn contest_summary_serialization() {
        let summary = ContestSummary {
            contest_id: String::from("461"),
            title: String::from("Weekly Contest 461"),
            contest_type: ContestType::Weekly,
            participants: 24000,
            found_users: 2,
            not_found_users: 1,
            total_stored: 3,
        };

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["contest_id"], "461");
        assert_eq!(value["contest_type"], "weekly");
        assert_eq!(value["found_users"], 2);
        assert_eq!(value["total_stored"], 3);
    }
}

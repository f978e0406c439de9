use crate::leetcode::model::{ContestInfo, RankingEntry, RankingPage};
use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::time::{self, Duration};

type Result<T> = std::result::Result<T, LeetCodeError>;

/// ランキングAPIの1ページあたりの件数。
/// これより少ないページが返ってきたら最終ページとみなす。
const RANKING_PAGE_SIZE: usize = 25;

const DEFAULT_MAX_PAGES: u32 = 800;
const DEFAULT_PAGE_INTERVAL: Duration = Duration::from_millis(300);

// LeetCode側のbot対策で素のUAは弾かれることがある
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0";

#[derive(Debug, Error)]
pub enum LeetCodeError {
    #[error("failed to request to leetcode")]
    RequestError(#[from] reqwest::Error),
    #[error("failed to deserialize JSON data")]
    DeserializeError(#[from] serde_json::Error),
    #[error("invalid leetcode url given")]
    InvalidUrlError(#[from] url::ParseError),
    #[error("{0}")]
    UnexpectedError(String),
}

#[async_trait]
pub trait ContestApi {
    async fn contest_list(&self) -> Result<Vec<ContestInfo>>;
    async fn contest_ranking(&self, slug: &str) -> Result<Vec<RankingEntry>>;
}

pub struct LeetCodeClient {
    list_url: Url,
    ranking_base_url: Url,
    client: Client,
    max_pages: u32,
    page_interval: Duration,
}

impl LeetCodeClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        base_url.set_path("");
        let list_url = base_url.join("contest/api/list/")?;
        let ranking_base_url = base_url.join("contest/api/ranking/")?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(LeetCodeClient {
            list_url,
            ranking_base_url,
            client,
            max_pages: DEFAULT_MAX_PAGES,
            page_interval: DEFAULT_PAGE_INTERVAL,
        })
    }

    /// コンテスト一覧を取得するメソッド
    pub async fn fetch_contest_list(&self) -> Result<Vec<ContestInfo>> {
        tracing::info!("Start to retrieve contest list from LeetCode");
        let res = self.client.get(self.list_url.clone()).send().await?;

        match res.error_for_status_ref() {
            Ok(_) => {}
            Err(e) => {
                return Err(LeetCodeError::UnexpectedError(format!(
                    "error response returned from contest list api: {}",
                    e
                )));
            }
        }

        let body = res.text().await?;
        let contests: Vec<ContestInfo> = serde_json::from_str(&body)?;

        tracing::info!("{} contests successfully retrieved.", contests.len());

        Ok(contests)
    }

    /// ランキングページのうちの1ページを取得するメソッド
    pub async fn fetch_ranking_page(&self, slug: &str, page: u32) -> Result<Vec<RankingEntry>> {
        let url = self.ranking_base_url.join(&format!("{}/", slug))?;
        let res = self
            .client
            .get(url)
            .query(&[
                ("pagination", page.to_string().as_ref()),
                ("region", "global"),
            ])
            .send()
            .await?;

        match res.error_for_status_ref() {
            Ok(_) => {}
            Err(e) => {
                return Err(LeetCodeError::UnexpectedError(format!(
                    "error response returned from ranking page {} of {}: {}",
                    page, slug, e
                )));
            }
        }

        let body = res.text().await?;
        let ranking: RankingPage = serde_json::from_str(&body)?;

        Ok(ranking.total_rank)
    }
}

#[async_trait]
impl ContestApi for LeetCodeClient {
    async fn contest_list(&self) -> Result<Vec<ContestInfo>> {
        self.fetch_contest_list().await
    }

    /// ランキングを1ページ目から順に取得して参加者一覧を組み立てるメソッド
    ///
    /// 規定サイズに満たないページが返ってきた時点で打ち切る
    async fn contest_ranking(&self, slug: &str) -> Result<Vec<RankingEntry>> {
        tracing::info!("Start to fetch ranking pages of {}", slug);

        let mut participants: Vec<RankingEntry> = Vec::new();
        for page in 1..=self.max_pages {
            let entries = self.fetch_ranking_page(slug, page).await?;
            if entries.is_empty() {
                tracing::info!("No more entries at ranking page {}", page);
                break;
            }

            let is_last = entries.len() < RANKING_PAGE_SIZE;
            participants.extend(entries);

            if is_last {
                tracing::info!("Reached end of ranking at page {}", page);
                break;
            }

            time::sleep(self.page_interval).await;
        }

        tracing::info!("{} participants fetched from {}.", participants.len(), slug);

        Ok(participants)
    }
}

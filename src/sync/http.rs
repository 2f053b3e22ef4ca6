//! HTTP JSON feed collaborator.
//!
//! Thin transport wrapper: fetches JSON documents and decodes them into the
//! snapshot types. All diffing and state-machine logic stays in the
//! pipeline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::sync::feed::{FeedError, FeedSource, GameSnapshot, RosterSnapshot};
use crate::types::Game;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Feed over HTTP serving JSON documents:
///
/// - `GET {base}/games/{game_id}.json` -> [`GameSnapshot`]
/// - `GET {base}/teams/{team_id}/roster.json` -> [`RosterSnapshot`]
/// - `GET {base}/schedule.json` -> `Vec<Game>`
pub struct HttpFeed {
    client: Client,
    base_url: String,
}

impl HttpFeed {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string() })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FeedError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            // 4xx means the document itself is wrong; 5xx is upstream
            // trouble worth retrying.
            return if status.is_server_error() {
                Err(FeedError::Unavailable(format!("{url}: HTTP {status}")))
            } else {
                Err(FeedError::Malformed(format!("{url}: HTTP {status}")))
            };
        }

        response.json::<T>().await.map_err(|e| FeedError::Malformed(format!("{url}: {e}")))
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn game_snapshot(&self, game_id: &str) -> Result<GameSnapshot, FeedError> {
        self.fetch(&format!("games/{game_id}.json")).await
    }

    async fn roster_snapshot(&self, team_id: &str) -> Result<RosterSnapshot, FeedError> {
        self.fetch(&format!("teams/{team_id}/roster.json")).await
    }

    async fn current_schedule(&self) -> Result<Vec<Game>, FeedError> {
        self.fetch("schedule.json").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let feed = HttpFeed::new("http://feed.example/v1/", None).unwrap();
        assert_eq!(feed.base_url, "http://feed.example/v1");
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_transient() {
        let feed =
            HttpFeed::new("http://127.0.0.1:1", Some(Duration::from_millis(200))).unwrap();
        let err = feed.game_snapshot("2012090500").await.unwrap_err();
        assert!(err.is_transient(), "connection failure should be retryable: {err}");
    }
}

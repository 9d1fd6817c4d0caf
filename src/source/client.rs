use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::{config::SourceConfig, domain::ContentItem};

use super::api::{build_url, parse_response, ItemsResponse};

#[derive(Debug, Error)]
pub enum FetchError {
    /// The item was deleted or is otherwise unavailable.
    #[error("item not found")]
    NotFound,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error {error_id}: {message}")]
    Api { error_id: i64, message: String },
    #[error("malformed api response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_item(&self, item_id: i64) -> Result<ContentItem, FetchError>;
}

pub struct StackExchangeSource {
    http: Client,
    config: SourceConfig,
    site: String,
}

impl StackExchangeSource {
    pub fn new(http: Client, config: SourceConfig, site: impl Into<String>) -> Self {
        Self {
            http,
            config,
            site: site.into(),
        }
    }
}

#[async_trait]
impl ContentSource for StackExchangeSource {
    async fn fetch_item(&self, item_id: i64) -> Result<ContentItem, FetchError> {
        let url = build_url(&self.config, &self.site, item_id);
        let response = self
            .http
            .get(url)
            .timeout(self.config.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        parse_body(status, &body, item_id)
    }
}

/// Error payloads arrive with 4xx statuses but still carry JSON; only a
/// non-JSON body falls back to the HTTP status.
fn parse_body(status: StatusCode, body: &[u8], item_id: i64) -> Result<ContentItem, FetchError> {
    let parsed: ItemsResponse = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(err) if status.is_success() => return Err(FetchError::Malformed(err.to_string())),
        Err(_) => {
            return Err(FetchError::Api {
                error_id: i64::from(status.as_u16()),
                message: String::from_utf8_lossy(body).into_owned(),
            })
        }
    };
    parse_response(parsed, item_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_error_status_becomes_api_error() {
        match parse_body(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>", 1) {
            Err(FetchError::Api { error_id, message }) => {
                assert_eq!(error_id, 502);
                assert_eq!(message, "<html>bad gateway</html>");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_success_is_malformed() {
        assert!(matches!(
            parse_body(StatusCode::OK, b"not json", 1),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn json_error_payload_wins_over_status() {
        let body = br#"{"error_id": 400, "error_name": "bad_parameter", "error_message": "site is required"}"#;
        match parse_body(StatusCode::BAD_REQUEST, body, 1) {
            Err(FetchError::Api { error_id, message }) => {
                assert_eq!(error_id, 400);
                assert_eq!(message, "site is required");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_success_parses_the_item() {
        let body = br#"{"items": [{"question_id": 9, "title": "t", "body": "b", "tags": [],
            "creation_date": 1700000000, "last_activity_date": 1700000000}]}"#;
        let item = parse_body(StatusCode::OK, body, 9).unwrap();
        assert_eq!(item.id, 9);
        assert_eq!(item.primary_tag(), None);
    }
}

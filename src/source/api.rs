use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use url::Url;

use crate::{config::SourceConfig, domain::ContentItem};

use super::client::FetchError;

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#(\d+)|#[xX]([0-9a-fA-F]+)|(amp|lt|gt|quot|apos));").expect("valid entity regex")
});

pub fn build_url(config: &SourceConfig, site: &str, item_id: i64) -> Url {
    let mut url = config.api_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push("questions")
            .push(&item_id.to_string());
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("site", site);
        query.append_pair("filter", &config.filter);
        if let Some(key) = &config.api_key {
            query.append_pair("key", key);
        }
    }
    url
}

pub fn parse_response(response: ItemsResponse, item_id: i64) -> Result<ContentItem, FetchError> {
    if let Some(error_id) = response.error_id {
        return Err(FetchError::Api {
            error_id,
            message: response
                .error_message
                .or(response.error_name)
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    if let Some(remaining) = response.quota_remaining {
        tracing::trace!(target: "source", remaining, "api quota");
    }

    let question = response
        .items
        .into_iter()
        .find(|q| q.question_id == item_id)
        .ok_or(FetchError::NotFound)?;

    Ok(ContentItem {
        id: question.question_id,
        title: decode_entities(&question.title),
        body: question.body,
        tags: question.tags,
        created_at: from_epoch(question.creation_date)?,
        last_activity_at: from_epoch(question.last_activity_date)?,
    })
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>, FetchError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| FetchError::Malformed(format!("timestamp {secs} out of range")))
}

/// Undoes the HTML escaping the API applies to titles.
pub fn decode_entities(text: &str) -> String {
    ENTITY_REGEX
        .replace_all(text, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.get(1) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else if let Some(hex) = caps.get(2) {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32)
            } else {
                match caps.get(3).map(|m| m.as_str()) {
                    Some("amp") => Some('&'),
                    Some("lt") => Some('<'),
                    Some("gt") => Some('>'),
                    Some("quot") => Some('"'),
                    Some("apos") => Some('\''),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[derive(Debug, Deserialize)]
pub struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<ApiQuestion>,
    pub error_id: Option<i64>,
    pub error_name: Option<String>,
    pub error_message: Option<String>,
    pub quota_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApiQuestion {
    pub question_id: i64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub creation_date: i64,
    pub last_activity_date: i64,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(key: Option<&str>) -> SourceConfig {
        SourceConfig {
            api_url: Url::parse("https://api.stackexchange.com/2.3").unwrap(),
            api_key: key.map(str::to_string),
            filter: "withbody".into(),
            timeout: Duration::from_secs(10),
            item_url_base: "https://stackoverflow.com/q".into(),
        }
    }

    #[test]
    fn build_url_includes_site_filter_and_key() {
        let url = build_url(&config(Some("k(ey")), "stackoverflow", 123);
        assert_eq!(
            url.as_str(),
            "https://api.stackexchange.com/2.3/questions/123?site=stackoverflow&filter=withbody&key=k%28ey"
        );
        let url = build_url(&config(None), "superuser", 7);
        assert_eq!(
            url.as_str(),
            "https://api.stackexchange.com/2.3/questions/7?site=superuser&filter=withbody"
        );
    }

    #[test]
    fn parse_response_maps_question_fields() {
        let raw = r#"{
            "items": [{
                "question_id": 55,
                "title": "Why &quot;x&quot; &amp; y&#39;s &#x3C;z&gt;?",
                "body": "<p>help</p>",
                "tags": ["rust", "tokio"],
                "creation_date": 1700000000,
                "last_activity_date": 1700001800
            }],
            "quota_remaining": 9000
        }"#;
        let response: ItemsResponse = serde_json::from_str(raw).unwrap();
        let item = parse_response(response, 55).unwrap();
        assert_eq!(item.id, 55);
        assert_eq!(item.title, "Why \"x\" & y's <z>?");
        assert_eq!(item.body, "<p>help</p>");
        assert_eq!(item.primary_tag(), Some("rust"));
        assert_eq!(item.created_at.timestamp(), 1_700_000_000);
        assert_eq!((item.last_activity_at - item.created_at).num_minutes(), 30);
    }

    #[test]
    fn empty_items_is_not_found_and_errors_are_api_errors() {
        let response: ItemsResponse = serde_json::from_str(r#"{"items": []}"#).unwrap();
        assert!(matches!(parse_response(response, 1), Err(FetchError::NotFound)));

        let response: ItemsResponse = serde_json::from_str(
            r#"{"error_id": 502, "error_name": "throttle_violation", "error_message": "too many requests"}"#,
        )
        .unwrap();
        match parse_response(response, 1) {
            Err(FetchError::Api { error_id, message }) => {
                assert_eq!(error_id, 502);
                assert_eq!(message, "too many requests");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_entities_are_left_alone() {
        assert_eq!(decode_entities("a &nbsp; b &#xZZ;"), "a &nbsp; b &#xZZ;");
    }
}

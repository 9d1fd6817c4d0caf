use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::CandidateEvent;

const HEARTBEAT_ACTION: &str = "hb";
const SITE_FIELD: &str = "apiSiteParameter";
const ITEM_ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Candidate(CandidateEvent),
    /// Well-formed event for a site we are not watching.
    Irrelevant { site: String },
    Heartbeat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8 (base64: {base64})")]
    NotUtf8 { base64: String },
    #[error("envelope is not a flat string-keyed object: {0}")]
    MalformedEnvelope(String),
    #[error("envelope has no data field")]
    MissingPayload,
    #[error("payload is not a string-keyed object: {0}")]
    MalformedPayload(String),
    #[error("payload has no apiSiteParameter field")]
    MissingSite,
    #[error("payload has no integer id field")]
    MissingItemId,
}

/// Turns raw feed frames into typed candidate events for one target site.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    target_site: String,
}

impl EventDecoder {
    pub fn new(target_site: impl Into<String>) -> Self {
        Self {
            target_site: target_site.into(),
        }
    }

    /// Decodes a binary frame, treating it as UTF-8 text.
    pub fn decode(&self, raw: &[u8]) -> Result<Decoded, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8 {
            base64: STANDARD.encode(raw),
        })?;
        self.decode_text(text)
    }

    pub fn decode_text(&self, text: &str) -> Result<Decoded, DecodeError> {
        let envelope: HashMap<String, String> = serde_json::from_str(text)
            .map_err(|err| DecodeError::MalformedEnvelope(err.to_string()))?;

        if envelope.get("action").map(String::as_str) == Some(HEARTBEAT_ACTION) {
            return Ok(Decoded::Heartbeat);
        }

        let data = envelope.get("data").ok_or(DecodeError::MissingPayload)?;
        let payload: Map<String, Value> = serde_json::from_str(data)
            .map_err(|err| DecodeError::MalformedPayload(err.to_string()))?;

        let site = payload
            .get(SITE_FIELD)
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingSite)?;
        if site != self.target_site {
            return Ok(Decoded::Irrelevant {
                site: site.to_string(),
            });
        }

        let item_id = payload
            .get(ITEM_ID_FIELD)
            .and_then(Value::as_i64)
            .ok_or(DecodeError::MissingItemId)?;

        Ok(Decoded::Candidate(CandidateEvent {
            site: site.to_string(),
            item_id,
        }))
    }
}

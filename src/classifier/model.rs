use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

/// Per-token likelihoods, keyed by the lower-cased token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenStatistics {
    pub token: String,
    pub probability_given_bad: f64,
    pub probability_given_good: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierModel {
    pub prior: f64,
    table: HashMap<String, TokenStatistics>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("token {token:?} has invalid probabilities {values:?}")]
    InvalidProbability { token: String, values: Vec<f64> },
    #[error("token {0:?} appears more than once ignoring case")]
    DuplicateToken(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedModel {
    #[serde(default)]
    initial_probability: Option<f64>,
    word_probabilities: HashMap<String, Vec<f64>>,
}

impl ClassifierModel {
    pub fn new(prior: f64) -> Self {
        Self {
            prior,
            table: HashMap::new(),
        }
    }

    /// Builds a model from `(token, p_bad, p_good)` triples. Later duplicates win.
    #[cfg(test)]
    pub fn from_entries<I, S>(prior: f64, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64, f64)>,
        S: AsRef<str>,
    {
        let mut model = Self::new(prior);
        for (token, bad, good) in entries {
            model.insert(token.as_ref(), bad, good);
        }
        model
    }

    fn insert(&mut self, token: &str, bad: f64, good: f64) -> Option<TokenStatistics> {
        let token = token.to_lowercase();
        let stats = TokenStatistics {
            token: token.clone(),
            probability_given_bad: bad,
            probability_given_good: good,
        };
        self.table.insert(token, stats)
    }

    /// Loads the persisted word table. The stored initial probability is
    /// informational only; scoring uses `prior`.
    pub fn load(path: &Path, prior: f64) -> Result<Self, ModelError> {
        let raw = fs::read(path)?;
        Self::from_json(&raw, prior)
    }

    pub fn from_json(raw: &[u8], prior: f64) -> Result<Self, ModelError> {
        let persisted: PersistedModel = serde_json::from_slice(raw)?;
        if let Some(stored) = persisted.initial_probability {
            tracing::debug!(
                target: "classifier",
                stored,
                configured = prior,
                "ignoring stored initial probability"
            );
        }

        let mut model = Self::new(prior);
        for (token, values) in persisted.word_probabilities {
            let (bad, good) = match values.as_slice() {
                [bad, good] if valid_probability(*bad) && valid_probability(*good) => (*bad, *good),
                _ => return Err(ModelError::InvalidProbability { token, values }),
            };
            if model.insert(&token, bad, good).is_some() {
                return Err(ModelError::DuplicateToken(token.to_lowercase()));
            }
        }
        Ok(model)
    }

    pub fn get(&self, token: &str) -> Option<&TokenStatistics> {
        self.table.get(token)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn valid_probability(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_reads_word_table_and_lowercases_tokens() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"initialProbability":0.5,"wordProbabilities":{{"Homework":[0.02,0.001],"rust":[0.001,0.004]}}}}"#
        )
        .unwrap();

        let model = ClassifierModel::load(file.path(), 0.263).unwrap();
        assert_eq!(model.prior, 0.263);
        assert_eq!(model.len(), 2);
        let stats = model.get("homework").unwrap();
        assert_eq!(stats.probability_given_bad, 0.02);
        assert_eq!(stats.probability_given_good, 0.001);
        assert!(model.get("Homework").is_none());
    }

    #[test]
    fn load_rejects_out_of_range_probabilities() {
        let raw = br#"{"wordProbabilities":{"zero":[0.0,0.5]}}"#;
        let err = ClassifierModel::from_json(raw, 0.263).unwrap_err();
        assert!(matches!(err, ModelError::InvalidProbability { ref token, .. } if token == "zero"));

        let raw = br#"{"wordProbabilities":{"short":[0.5]}}"#;
        assert!(matches!(
            ClassifierModel::from_json(raw, 0.263),
            Err(ModelError::InvalidProbability { .. })
        ));
    }

    #[test]
    fn load_reports_malformed_json() {
        assert!(matches!(
            ClassifierModel::from_json(b"[1, 2]", 0.263),
            Err(ModelError::Parse(_))
        ));
    }

    #[test]
    fn load_rejects_tokens_that_collide_after_lowercasing() {
        let raw = br#"{"wordProbabilities":{"Foo":[0.2,0.1],"foo":[0.3,0.4]}}"#;
        assert!(matches!(
            ClassifierModel::from_json(raw, 0.263),
            Err(ModelError::DuplicateToken(ref token)) if token == "foo"
        ));
    }
}

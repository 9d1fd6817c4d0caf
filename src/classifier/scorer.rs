use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::ContentItem;

use super::model::ClassifierModel;

/// Result of running the odds accumulation over one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub bad: bool,
    pub p_bad: f64,
    pub p_good: f64,
    pub matched_tokens: Vec<String>,
}

/// Naive-Bayes style scorer over a swappable token table.
pub struct Classifier {
    model: RwLock<Arc<ClassifierModel>>,
    threshold: f64,
}

impl Classifier {
    pub fn new(model: ClassifierModel, threshold: f64) -> Self {
        Self {
            model: RwLock::new(Arc::new(model)),
            threshold,
        }
    }

    pub fn model(&self) -> Arc<ClassifierModel> {
        self.model.read().clone()
    }

    /// Installs a new table. Scoring already in progress keeps the old one.
    pub fn reload(&self, model: ClassifierModel) {
        let tokens = model.len();
        *self.model.write() = Arc::new(model);
        tracing::info!(target: "classifier", tokens, "classifier model swapped");
    }

    /// Scores an item's body; `bad` is the report decision.
    pub fn score(&self, item: &ContentItem) -> Evaluation {
        self.evaluate(&item.body)
    }

    pub fn evaluate(&self, text: &str) -> Evaluation {
        let model = self.model();
        let mut p_bad = model.prior;
        let mut p_good = 1.0 - model.prior;
        let mut matched_tokens = Vec::new();

        for token in tokenize(text) {
            let Some(stats) = model.get(&token) else {
                continue;
            };
            let new_bad = p_bad * stats.probability_given_bad;
            let new_good = p_good * stats.probability_given_good;
            // An exact zero on either side would pin the ratio forever.
            if new_bad != 0.0 && new_good != 0.0 {
                p_bad = new_bad;
                p_good = new_good;
            }
            matched_tokens.push(token);
        }

        Evaluation {
            bad: p_bad * self.threshold > p_good,
            p_bad,
            p_good,
            matched_tokens,
        }
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

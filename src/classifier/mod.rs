pub mod model;
pub mod scorer;

pub use model::ClassifierModel;
pub use scorer::{Classifier, Evaluation};

//! Core library: patient features, classifiers, risk banding, training and
//! the report agent with its optional knowledge retrieval.

pub mod assessment;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod features;
pub mod knowledge;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod retrieval;
pub mod risk;
pub mod rules;
pub mod training;
pub mod vectorstore;

pub use assessment::{assess, Assessment, AssessmentOptions, FactorWeight};
pub use error::RiskError;
pub use features::{preprocess, FeatureVector, PatientInput};
pub use registry::ModelRegistry;
pub use risk::{RiskCategory, RiskThresholds};

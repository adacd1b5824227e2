//! Core services of the forecasting engine

pub mod accuracy;
pub mod cache;
pub mod engine;
pub mod ensemble;
pub mod notification;
pub mod pg_store;
pub mod physical;
pub mod reasoning;
pub mod response_parser;
pub mod sources;
pub mod store;
pub mod trigger;

pub use accuracy::{AccuracyTracker, AccuracyWeights, ReconcileSummary};
pub use cache::AnalysisCache;
pub use engine::{CycleReport, EngineSnapshot, ForecastEngine, ReasoningStatus};
pub use ensemble::EnsembleBlender;
pub use notification::{AlertPolicy, LogNotifier, Notification, Notifier};
pub use pg_store::PgStore;
pub use physical::PhysicalForecastGenerator;
pub use reasoning::{Prompt, ReasoningCapability, ReasoningForecastGenerator};
pub use sources::{MeasurementSource, NoWarnings, WarningSource};
pub use store::{ForecastStore, MemoryStore};
pub use trigger::TriggerEvaluator;

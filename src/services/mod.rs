pub mod interaction_log;
pub mod interactions;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod recommendations;
pub mod top_items;
pub mod tuning;

pub use interaction_log::InteractionLog;
pub use interactions::InteractionService;
pub use pipeline::{Pipeline, PipelineSettings};
pub use recommendations::{BlendSettings, RecommendationService};

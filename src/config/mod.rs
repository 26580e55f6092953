mod schema;

pub use schema::{
    Config, CriterionConfig, FeedbackConfig, ModelConfig, ProviderConfig, ServerConfig,
    StoreConfig,
};

pub(crate) use schema::normalize_endpoint;

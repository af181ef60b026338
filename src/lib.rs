pub mod chain;
pub mod config;
pub mod error;
pub mod filters;
pub mod message;
pub mod mime;
pub mod registry;
pub mod tokenize;

pub use chain::FilterChain;
pub use error::SiftError;
pub use filters::bayes::BayesFilter;
pub use filters::blacklist::BlacklistFilter;
pub use filters::{Filter, Verdict};
pub use message::Message;
pub use registry::{register_filter, FilterRegistry};

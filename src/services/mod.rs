//! Business logic services

pub mod attribute_mapper;
pub mod authority;
pub mod cache;
pub mod orchestrator;
pub mod reconciliation;
pub mod retry;
pub mod wapi;

pub use attribute_mapper::AttributeSuggester;
pub use authority::AuthorityClient;
pub use cache::{
    Cache, CacheEntry, CacheServiceStats, CacheStats, CacheSyncJob, CachedAuthorityService,
};
pub use orchestrator::{
    NetworkWriter, SubmitOptions, TaskError, TaskOrchestrator, TaskRetentionJob,
};
pub use reconciliation::{check_record_limit, classify, validate_values};
pub use retry::RetryPolicy;
pub use wapi::{ApiRequest, ClientError, LastStatus, TransportFailure, WapiClient};

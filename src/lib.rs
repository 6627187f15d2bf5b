//! DDI Sync Library
//!
//! Reconciles cloud network inventory with a DDI authority: suggests tag to
//! attribute mappings, classifies records against the authority, and applies
//! approved changes as background tasks.

use std::sync::Arc;

use anyhow::{Context, Result};

pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
use services::{
    AttributeSuggester, AuthorityClient, CachedAuthorityService, NetworkWriter, TaskOrchestrator,
    WapiClient,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Cached access to the DDI authority
    pub authority: CachedAuthorityService,
    pub suggester: Arc<AttributeSuggester>,
    /// Background write tasks
    pub orchestrator: TaskOrchestrator,
}

impl AppState {
    /// Build every service from configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        let wapi = WapiClient::new(&config.authority, &config.client)
            .context("Failed to initialize DDI authority client")?;
        let client = AuthorityClient::new(Arc::new(wapi), config.authority.page_size);
        let authority = CachedAuthorityService::new(client, config.cache.clone());

        let writer: Arc<dyn NetworkWriter> = Arc::new(authority.clone());
        let orchestrator = TaskOrchestrator::new(writer, &config.tasks);
        let suggester = Arc::new(AttributeSuggester::new(config.suggester.clone()));

        Ok(Self {
            config,
            authority,
            suggester,
            orchestrator,
        })
    }
}

//! Agentlab server - work coordination engine for research agent labs

pub mod api;
pub mod artifacts;
pub mod auth;
pub mod config;
pub mod error;
pub mod lab;
pub mod lifecycle;
pub mod models;
pub mod providers;
pub mod scoring;
pub mod store;
pub mod voting;
pub mod websocket;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::IdentityResolver;
use crate::config::ServerConfig;
use crate::lifecycle::TaskLifecycle;
use crate::providers::{JobReconciler, ProviderClient};
use crate::scoring::VerificationEngine;

/// Application state shared across handlers
pub struct AppState {
    pub lifecycle: TaskLifecycle,
    pub reconciler: JobReconciler,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &ServerConfig) -> error::Result<Arc<Self>> {
        let store = store::Store::new(pool);
        let engine = Arc::new(VerificationEngine::with_defaults(config.domain_weight()));
        let lifecycle = TaskLifecycle::new(store.clone(), engine);

        let client = |url: &Option<String>| {
            ServerConfig::provider_url(url)
                .map(|url| {
                    ProviderClient::new(
                        url,
                        config.provider_api_key.clone(),
                        config.provider_timeout(),
                    )
                })
                .transpose()
        };
        let literature = client(&config.literature_provider_url)?;
        let analysis = client(&config.analysis_provider_url)?;
        if literature.is_none() {
            tracing::warn!("No literature provider configured");
        }
        if analysis.is_none() {
            tracing::warn!("No analysis provider configured");
        }

        let reconciler = JobReconciler::new(
            lifecycle.clone(),
            literature,
            analysis,
            config.retry_policy(),
        );

        Ok(Arc::new(Self {
            lifecycle,
            reconciler,
            identity: Arc::new(store),
        }))
    }

    pub fn store(&self) -> &store::Store {
        self.lifecycle.store()
    }
}

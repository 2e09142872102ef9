//! Verification engine
//!
//! Selects the domain adapter for a task type, runs every applicable
//! cross-cutting verifier, and merges the outputs. Verification never
//! fails: missing adapters and unusable results degrade to a zero score.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

use super::adapters::{default_adapters, DomainAdapter};
use super::cross_cutting::{default_verifiers, CrossCuttingVerifier};
use super::types::{fail_result, merge, VerificationResult, DEFAULT_DOMAIN_WEIGHT};
use super::TaskMetadata;
use crate::lifecycle::TaskType;

pub struct VerificationEngine {
    adapters: HashMap<TaskType, Box<dyn DomainAdapter>>,
    cross_cutting: Vec<Box<dyn CrossCuttingVerifier>>,
    domain_weight: f64,
}

impl VerificationEngine {
    /// Create an engine with no adapters or verifiers registered. A
    /// non-finite weight falls back to the default.
    pub fn empty(domain_weight: f64) -> Self {
        let domain_weight = if domain_weight.is_finite() {
            domain_weight.clamp(0.0, 1.0)
        } else {
            DEFAULT_DOMAIN_WEIGHT
        };
        Self {
            adapters: HashMap::new(),
            cross_cutting: Vec::new(),
            domain_weight,
        }
    }

    /// Create an engine with the built-in adapters and verifiers
    pub fn with_defaults(domain_weight: f64) -> Self {
        let mut engine = Self::empty(domain_weight);
        for adapter in default_adapters() {
            engine.register_adapter(adapter);
        }
        for verifier in default_verifiers() {
            engine.register_cross_cutting(verifier);
        }
        engine
    }

    /// Register an adapter, replacing any previous one for the same task type
    pub fn register_adapter(&mut self, adapter: Box<dyn DomainAdapter>) {
        self.adapters.insert(adapter.task_type(), adapter);
    }

    pub fn register_cross_cutting(&mut self, verifier: Box<dyn CrossCuttingVerifier>) {
        self.cross_cutting.push(verifier);
    }

    pub fn domain_weight(&self) -> f64 {
        self.domain_weight
    }

    pub fn verify(&self, result: &Value, metadata: &TaskMetadata) -> VerificationResult {
        let started = Instant::now();
        let domain = metadata.task_type.as_str();

        let adapter = match self.adapters.get(&metadata.task_type) {
            Some(adapter) => adapter,
            None => {
                tracing::warn!(
                    task_id = %metadata.task_id,
                    "No domain adapter registered for task type {}",
                    domain
                );
                return fail_result(
                    domain,
                    vec![format!("No domain adapter for task type {}", domain)],
                );
            }
        };

        let mut domain_result = adapter.verify(result, metadata);
        domain_result.compute_time = started.elapsed().as_secs_f64();

        // Structurally invalid results are not rescued by cross-cutting checks
        if domain_result.score == 0.0 && !domain_result.errors.is_empty() {
            tracing::debug!(
                task_id = %metadata.task_id,
                errors = ?domain_result.errors,
                "Domain verification failed"
            );
            return domain_result;
        }

        let cross_cutting: Vec<_> = self
            .cross_cutting
            .iter()
            .filter(|v| v.is_applicable(result, metadata))
            .map(|v| {
                let cc_started = Instant::now();
                let mut cc = v.verify(result, metadata);
                cc.compute_time = cc_started.elapsed().as_secs_f64();
                cc
            })
            .collect();

        let merged = merge(domain_result, &cross_cutting, self.domain_weight);
        tracing::debug!(
            task_id = %metadata.task_id,
            score = merged.score,
            badge = merged.badge.as_str(),
            cross_cutting = cross_cutting.len(),
            "Verification finished"
        );
        merged
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_DOMAIN_WEIGHT)
    }
}

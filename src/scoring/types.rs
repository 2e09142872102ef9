//! Scoring value types and the score-merge formula

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Weight given to the domain adapter when cross-cutting results are present
pub const DEFAULT_DOMAIN_WEIGHT: f64 = 0.70;

/// Minimum score for a result to count as passed
pub const PASS_THRESHOLD: f64 = 0.5;

const GREEN_THRESHOLD: f64 = 0.8;

/// Three-tier summary of a verification score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Green,
    Amber,
    Red,
}

impl Badge {
    pub fn from_score(score: f64) -> Self {
        if score >= GREEN_THRESHOLD {
            Badge::Green
        } else if score >= PASS_THRESHOLD {
            Badge::Amber
        } else {
            Badge::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::Green => "green",
            Badge::Amber => "amber",
            Badge::Red => "red",
        }
    }
}

/// Round to four decimal places
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Outcome of verifying a result, from a domain adapter or after merging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub score: f64,
    pub badge: Badge,
    pub domain: String,
    pub details: Map<String, Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Seconds spent verifying
    pub compute_time: f64,
}

impl VerificationResult {
    /// Build a result whose pass flag and badge follow from `score`
    pub fn new(domain: impl Into<String>, score: f64) -> Self {
        let score = round4(score.clamp(0.0, 1.0));
        Self {
            passed: score >= PASS_THRESHOLD,
            score,
            badge: Badge::from_score(score),
            domain: domain.into(),
            details: Map::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            compute_time: 0.0,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Zero-score result used when a result cannot be evaluated at all
pub fn fail_result(domain: impl Into<String>, errors: Vec<String>) -> VerificationResult {
    let mut result = VerificationResult::new(domain, 0.0);
    result.passed = false;
    result.errors = errors;
    result
}

/// Outcome of one cross-cutting verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCuttingResult {
    pub verifier: String,
    pub score: f64,
    pub weight: f64,
    pub details: Map<String, Value>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub compute_time: f64,
}

impl CrossCuttingResult {
    pub fn new(verifier: impl Into<String>, score: f64, weight: f64) -> Self {
        Self {
            verifier: verifier.into(),
            score: round4(score.clamp(0.0, 1.0)),
            weight: weight.max(0.0),
            details: Map::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            compute_time: 0.0,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Blend a domain result with the cross-cutting results that applied to it.
///
/// With no cross-cutting results (or all of weight zero) the domain result
/// stands unchanged. Otherwise weights are normalized within the applicable
/// set and `final = dw * domain + (1 - dw) * aggregate`, clamped and rounded.
pub fn merge(
    domain: VerificationResult,
    cross_cutting: &[CrossCuttingResult],
    domain_weight: f64,
) -> VerificationResult {
    let total_weight: f64 = cross_cutting.iter().map(|c| c.weight).sum();
    if cross_cutting.is_empty() || total_weight <= 0.0 {
        return domain;
    }

    let domain_weight = domain_weight.clamp(0.0, 1.0);
    let cc_aggregate: f64 = cross_cutting
        .iter()
        .map(|c| (c.weight / total_weight) * c.score)
        .sum();
    let raw = domain_weight * domain.score + (1.0 - domain_weight) * cc_aggregate;
    let final_score = round4(raw.clamp(0.0, 1.0));

    let mut errors = domain.errors.clone();
    let mut warnings = domain.warnings.clone();
    let mut compute_time = domain.compute_time;
    let mut cc_details = Vec::with_capacity(cross_cutting.len());

    for cc in cross_cutting {
        errors.extend(cc.errors.iter().cloned());
        warnings.extend(cc.warnings.iter().cloned());
        compute_time += cc.compute_time;
        cc_details.push(json!({
            "name": cc.verifier,
            "score": cc.score,
            "weight": cc.weight,
            "details": cc.details,
        }));
    }

    let mut details = domain.details;
    details.insert("cross_cutting".to_string(), Value::Array(cc_details));
    details.insert(
        "scoring".to_string(),
        json!({
            "domain_score": domain.score,
            "domain_weight": domain_weight,
            "cross_cutting_aggregate": round4(cc_aggregate),
            "cross_cutting_weight": round4(1.0 - domain_weight),
            "final_score": final_score,
        }),
    );

    VerificationResult {
        passed: final_score >= PASS_THRESHOLD,
        score: final_score,
        badge: Badge::from_score(final_score),
        domain: domain.domain,
        details,
        errors,
        warnings,
        compute_time,
    }
}

//! Domain adapters: one scoring strategy per task type
//!
//! Each adapter inspects the structured result a task was completed with.
//! A result that is structurally unusable for the domain scores zero with
//! explicit errors; otherwise the score is a weighted sum of checks.

use serde_json::{json, Value};

use super::types::{fail_result, VerificationResult};
use super::TaskMetadata;
use crate::lifecycle::TaskType;

/// Task-type-specific evaluation strategy
pub trait DomainAdapter: Send + Sync {
    fn task_type(&self) -> TaskType;

    fn verify(&self, result: &Value, metadata: &TaskMetadata) -> VerificationResult;
}

/// First non-empty string among `keys`
pub(crate) fn text_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// First array among `keys`
pub(crate) fn array_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|k| value.get(*k).and_then(Value::as_array))
}

fn has_nonempty(value: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|k| match value.get(*k) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(_)) | Some(Value::Bool(_)) => true,
        _ => false,
    })
}

/// Accumulates weighted checks into a score
struct Checklist {
    score: f64,
    checks: serde_json::Map<String, Value>,
    warnings: Vec<String>,
}

impl Checklist {
    fn new() -> Self {
        Self {
            score: 0.0,
            checks: serde_json::Map::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a check worth `weight`, earning `fraction` of it
    fn add(&mut self, name: &str, weight: f64, fraction: f64, warning: Option<&str>) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.score += weight * fraction;
        self.checks.insert(name.to_string(), json!(fraction));
        if fraction < 1.0 {
            if let Some(w) = warning {
                self.warnings.push(w.to_string());
            }
        }
    }

    fn finish(self, domain: &str) -> VerificationResult {
        let mut result = VerificationResult::new(domain, self.score)
            .with_detail("checks", Value::Object(self.checks));
        result.warnings = self.warnings;
        result
    }
}

fn require_object<'a>(result: &'a Value, domain: &str) -> Result<&'a Value, VerificationResult> {
    if result.is_object() {
        Ok(result)
    } else {
        Err(fail_result(
            domain,
            vec!["Result must be a JSON object".to_string()],
        ))
    }
}

fn fraction_with_identifier(entries: &[Value]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let identified = entries
        .iter()
        .filter(|p| text_field(p, &["doi", "url", "arxiv_id", "pmid", "link"]).is_some())
        .count();
    identified as f64 / entries.len() as f64
}

fn length_fraction(text: Option<&str>, target: usize) -> f64 {
    text.map(|t| (t.chars().count() as f64 / target as f64).min(1.0))
        .unwrap_or(0.0)
}

/// Literature reviews: a list of papers plus a written summary
pub struct LiteratureReviewAdapter;

impl DomainAdapter for LiteratureReviewAdapter {
    fn task_type(&self) -> TaskType {
        TaskType::LiteratureReview
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> VerificationResult {
        let domain = self.task_type().as_str();
        let result = match require_object(result, domain) {
            Ok(r) => r,
            Err(fail) => return fail,
        };
        let papers = match array_field(result, &["papers", "sources", "references"]) {
            Some(p) if !p.is_empty() => p,
            _ => {
                return fail_result(
                    domain,
                    vec!["Literature review must list at least one paper".to_string()],
                )
            }
        };

        let mut checks = Checklist::new();
        checks.add(
            "paper_count",
            0.35,
            papers.len() as f64 / 5.0,
            Some("Fewer than five papers reviewed"),
        );
        let titled = papers
            .iter()
            .filter(|p| p.is_string() || text_field(p, &["title"]).is_some())
            .count() as f64
            / papers.len() as f64;
        checks.add("titled_papers", 0.2, titled, Some("Some papers lack titles"));
        checks.add(
            "identified_papers",
            0.15,
            fraction_with_identifier(papers),
            Some("Some papers lack a DOI or URL"),
        );
        checks.add(
            "summary",
            0.3,
            length_fraction(text_field(result, &["summary", "synthesis", "overview"]), 200),
            Some("Summary is missing or short"),
        );

        checks
            .finish(domain)
            .with_detail("paper_count", json!(papers.len()))
    }
}

/// Analyses: methodology, findings, and supporting artifacts or statistics
pub struct AnalysisAdapter;

impl DomainAdapter for AnalysisAdapter {
    fn task_type(&self) -> TaskType {
        TaskType::Analysis
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> VerificationResult {
        let domain = self.task_type().as_str();
        let result = match require_object(result, domain) {
            Ok(r) => r,
            Err(fail) => return fail,
        };
        if !has_nonempty(result, &["findings", "summary", "conclusions"]) {
            return fail_result(
                domain,
                vec!["Analysis must report findings or a summary".to_string()],
            );
        }

        let mut checks = Checklist::new();
        checks.add(
            "methodology",
            0.25,
            if has_nonempty(result, &["methodology", "methods", "approach"]) {
                1.0
            } else {
                0.0
            },
            Some("No methodology described"),
        );
        let findings = array_field(result, &["findings"]).map(Vec::len).unwrap_or(0);
        checks.add(
            "findings",
            0.35,
            if findings > 0 {
                (findings as f64 / 3.0).min(1.0)
            } else {
                0.5
            },
            Some("Findings are thin or only summarized"),
        );
        checks.add(
            "artifacts",
            0.2,
            if has_nonempty(result, &["artifacts", "figures", "tables"]) {
                1.0
            } else {
                0.0
            },
            Some("No artifacts attached"),
        );
        checks.add(
            "statistics",
            0.2,
            if has_nonempty(result, &["statistics", "metrics", "results"]) {
                1.0
            } else {
                0.0
            },
            Some("No statistics or metrics reported"),
        );

        checks.finish(domain)
    }
}

/// Deep research: a long-form summary backed by sources and findings
pub struct DeepResearchAdapter;

impl DomainAdapter for DeepResearchAdapter {
    fn task_type(&self) -> TaskType {
        TaskType::DeepResearch
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> VerificationResult {
        let domain = self.task_type().as_str();
        let result = match require_object(result, domain) {
            Ok(r) => r,
            Err(fail) => return fail,
        };
        let summary = match text_field(result, &["summary", "report", "answer"]) {
            Some(s) => s,
            None => {
                return fail_result(
                    domain,
                    vec!["Deep research must include a summary or report".to_string()],
                )
            }
        };

        let mut checks = Checklist::new();
        checks.add(
            "summary_depth",
            0.3,
            length_fraction(Some(summary), 500),
            Some("Report is shorter than expected for deep research"),
        );
        let sources = array_field(result, &["papers", "sources", "references"])
            .map(Vec::len)
            .unwrap_or(0);
        checks.add(
            "sources",
            0.3,
            sources as f64 / 3.0,
            Some("Fewer than three sources cited"),
        );
        checks.add(
            "findings",
            0.2,
            if has_nonempty(result, &["findings", "key_points"]) {
                1.0
            } else {
                0.0
            },
            Some("No structured findings"),
        );
        checks.add(
            "open_questions",
            0.2,
            if has_nonempty(result, &["open_questions", "limitations", "next_steps"]) {
                1.0
            } else {
                0.0
            },
            Some("No open questions or limitations listed"),
        );

        checks.finish(domain)
    }
}

/// Critiques: concrete issues with severities and a recommendation
pub struct CritiqueAdapter;

impl DomainAdapter for CritiqueAdapter {
    fn task_type(&self) -> TaskType {
        TaskType::Critique
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> VerificationResult {
        let domain = self.task_type().as_str();
        let result = match require_object(result, domain) {
            Ok(r) => r,
            Err(fail) => return fail,
        };
        let issues = array_field(result, &["issues", "concerns"]);
        let assessment = text_field(result, &["assessment", "summary"]);
        if issues.map(Vec::is_empty).unwrap_or(true) && assessment.is_none() {
            return fail_result(
                domain,
                vec!["Critique must list issues or give an assessment".to_string()],
            );
        }

        let mut checks = Checklist::new();
        let issues = issues.map(Vec::as_slice).unwrap_or(&[]);
        let with_severity = if issues.is_empty() {
            0.0
        } else {
            issues
                .iter()
                .filter(|i| text_field(i, &["severity"]).is_some())
                .count() as f64
                / issues.len() as f64
        };
        checks.add(
            "issues",
            0.3,
            if issues.is_empty() { 0.0 } else { 1.0 },
            Some("No concrete issues listed"),
        );
        checks.add(
            "severities",
            0.2,
            with_severity,
            Some("Some issues lack a severity"),
        );
        checks.add(
            "recommendation",
            0.3,
            if text_field(result, &["recommendation", "verdict"]).is_some() {
                1.0
            } else {
                0.0
            },
            Some("No recommendation given"),
        );
        checks.add(
            "assessment",
            0.2,
            length_fraction(assessment, 100),
            Some("Assessment is missing or short"),
        );

        checks.finish(domain)
    }
}

/// Syntheses: a document (inline or by storage key) drawing on sources
pub struct SynthesisAdapter;

impl DomainAdapter for SynthesisAdapter {
    fn task_type(&self) -> TaskType {
        TaskType::Synthesis
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> VerificationResult {
        let domain = self.task_type().as_str();
        let result = match require_object(result, domain) {
            Ok(r) => r,
            Err(fail) => return fail,
        };
        let content = text_field(result, &["document", "content", "text"]);
        let document_key = text_field(result, &["document_key", "document_url"]);
        if content.is_none() && document_key.is_none() {
            return fail_result(
                domain,
                vec!["Synthesis must include a document or a document key".to_string()],
            );
        }

        let mut checks = Checklist::new();
        // Stored documents are opaque here; a key counts as a full-length body
        let body = if document_key.is_some() {
            1.0
        } else {
            length_fraction(content, 1000)
        };
        checks.add("document", 0.4, body, Some("Document is short"));
        let sources = array_field(result, &["sources", "source_tasks", "references"])
            .map(Vec::len)
            .unwrap_or(0);
        checks.add(
            "sources",
            0.3,
            sources as f64 / 2.0,
            Some("Synthesis draws on fewer than two sources"),
        );
        checks.add(
            "conclusions",
            0.3,
            if has_nonempty(result, &["conclusions", "summary", "key_findings"]) {
                1.0
            } else {
                0.0
            },
            Some("No conclusions stated"),
        );

        checks.finish(domain)
    }
}

/// One adapter per task type
pub fn default_adapters() -> Vec<Box<dyn DomainAdapter>> {
    vec![
        Box::new(LiteratureReviewAdapter),
        Box::new(AnalysisAdapter),
        Box::new(DeepResearchAdapter),
        Box::new(CritiqueAdapter),
        Box::new(SynthesisAdapter),
    ]
}

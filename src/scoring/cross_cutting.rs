//! Cross-cutting verifiers
//!
//! Checks that apply across task types whenever the result carries the
//! material they inspect. Each verifier has a fixed weight; weights are
//! normalized over the verifiers that applied.

use serde_json::{json, Value};

use super::adapters::{array_field, text_field};
use super::types::CrossCuttingResult;
use super::TaskMetadata;
use crate::lifecycle::TaskType;

pub trait CrossCuttingVerifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn weight(&self) -> f64;

    fn is_applicable(&self, result: &Value, metadata: &TaskMetadata) -> bool;

    fn verify(&self, result: &Value, metadata: &TaskMetadata) -> CrossCuttingResult;
}

const CITATION_KEYS: [&str; 4] = ["papers", "sources", "references", "citations"];

/// Share of cited works that carry a resolvable identifier
pub struct CitationVerifier;

impl CrossCuttingVerifier for CitationVerifier {
    fn name(&self) -> &'static str {
        "citations"
    }

    fn weight(&self) -> f64 {
        0.4
    }

    fn is_applicable(&self, result: &Value, _metadata: &TaskMetadata) -> bool {
        array_field(result, &CITATION_KEYS).is_some_and(|c| !c.is_empty())
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> CrossCuttingResult {
        let citations = array_field(result, &CITATION_KEYS)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let resolvable = citations
            .iter()
            .filter(|c| match c {
                Value::String(s) => s.starts_with("http") || s.starts_with("10."),
                other => text_field(other, &["doi", "url", "arxiv_id", "pmid", "link"]).is_some(),
            })
            .count();
        let score = if citations.is_empty() {
            0.0
        } else {
            resolvable as f64 / citations.len() as f64
        };

        let mut cc = CrossCuttingResult::new(self.name(), score, self.weight())
            .with_detail("total", json!(citations.len()))
            .with_detail("resolvable", json!(resolvable));
        if resolvable < citations.len() {
            cc = cc.with_warning(format!(
                "{} of {} citations have no DOI or URL",
                citations.len() - resolvable,
                citations.len()
            ));
        }
        cc
    }
}

/// Whether produced artifacts can be located and rerun
pub struct ReproducibilityVerifier;

impl CrossCuttingVerifier for ReproducibilityVerifier {
    fn name(&self) -> &'static str {
        "reproducibility"
    }

    fn weight(&self) -> f64 {
        0.35
    }

    fn is_applicable(&self, result: &Value, _metadata: &TaskMetadata) -> bool {
        ["artifacts", "code", "datasets"]
            .iter()
            .any(|k| result.get(*k).is_some())
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> CrossCuttingResult {
        let artifacts = array_field(result, &["artifacts"])
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let located = artifacts
            .iter()
            .filter(|a| {
                a.is_string()
                    || text_field(a, &["path", "url", "s3_path", "s3_key", "location", "file", "href"])
                        .is_some()
            })
            .count();
        let artifact_score = if artifacts.is_empty() {
            0.0
        } else {
            located as f64 / artifacts.len() as f64
        };
        let has_code = result.get("code").is_some_and(|c| !c.is_null());
        let has_environment = ["environment", "parameters", "seed", "datasets"]
            .iter()
            .any(|k| result.get(*k).is_some_and(|v| !v.is_null()));

        let score = 0.5 * artifact_score
            + 0.3 * f64::from(u8::from(has_code))
            + 0.2 * f64::from(u8::from(has_environment));

        let mut cc = CrossCuttingResult::new(self.name(), score, self.weight())
            .with_detail("located_artifacts", json!(located))
            .with_detail("has_code", json!(has_code))
            .with_detail("has_environment", json!(has_environment));
        if !has_code {
            cc = cc.with_warning("No code attached for reproduction");
        }
        cc
    }
}

/// Whether interpretive work acknowledges its limitations
pub struct LimitationsVerifier;

impl CrossCuttingVerifier for LimitationsVerifier {
    fn name(&self) -> &'static str {
        "limitations"
    }

    fn weight(&self) -> f64 {
        0.25
    }

    fn is_applicable(&self, _result: &Value, metadata: &TaskMetadata) -> bool {
        matches!(
            metadata.task_type,
            TaskType::Analysis | TaskType::DeepResearch | TaskType::Synthesis
        )
    }

    fn verify(&self, result: &Value, _metadata: &TaskMetadata) -> CrossCuttingResult {
        let listed = array_field(result, &["limitations", "caveats"]).is_some_and(|l| !l.is_empty())
            || text_field(result, &["limitations", "caveats"]).is_some();
        let mentioned = text_field(result, &["summary", "report", "document", "content"])
            .map(|s| s.to_lowercase().contains("limitation"))
            .unwrap_or(false);

        let score = if listed {
            1.0
        } else if mentioned {
            0.5
        } else {
            0.0
        };

        let mut cc = CrossCuttingResult::new(self.name(), score, self.weight())
            .with_detail("listed", json!(listed))
            .with_detail("mentioned_in_text", json!(mentioned));
        if !listed {
            cc = cc.with_warning("Limitations are not listed explicitly");
        }
        cc
    }
}

pub fn default_verifiers() -> Vec<Box<dyn CrossCuttingVerifier>> {
    vec![
        Box::new(CitationVerifier),
        Box::new(ReproducibilityVerifier),
        Box::new(LimitationsVerifier),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn metadata(task_type: TaskType) -> TaskMetadata {
        TaskMetadata {
            task_id: Uuid::new_v4(),
            task_type,
            title: String::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_citation_verifier_applicability() {
        let meta = metadata(TaskType::LiteratureReview);
        assert!(!CitationVerifier.is_applicable(&json!({"summary": "x"}), &meta));
        assert!(!CitationVerifier.is_applicable(&json!({"papers": []}), &meta));
        assert!(CitationVerifier.is_applicable(&json!({"papers": [{"title": "a"}]}), &meta));
    }

    #[test]
    fn test_citation_verifier_scores_resolvable_share() {
        let meta = metadata(TaskType::LiteratureReview);
        let result = json!({"papers": [
            {"title": "a", "doi": "10.1/a"},
            {"title": "b"},
            "https://example.org/c",
            "untraceable"
        ]});
        let cc = CitationVerifier.verify(&result, &meta);
        assert_eq!(cc.score, 0.5);
        assert_eq!(cc.weight, 0.4);
        assert_eq!(cc.warnings.len(), 1);
    }

    #[test]
    fn test_reproducibility_verifier() {
        let meta = metadata(TaskType::Analysis);
        let result = json!({
            "artifacts": [{"name": "a.csv", "path": "s3://x/a.csv"}],
            "code": "import pandas",
            "parameters": {"alpha": 0.05}
        });
        assert!(ReproducibilityVerifier.is_applicable(&result, &meta));
        let cc = ReproducibilityVerifier.verify(&result, &meta);
        assert_eq!(cc.score, 1.0);
        assert!(cc.warnings.is_empty());

        let bare = json!({"artifacts": [{"name": "a.csv"}]});
        let cc = ReproducibilityVerifier.verify(&bare, &meta);
        assert_eq!(cc.score, 0.0);
        assert_eq!(cc.warnings.len(), 1);
    }

    #[test]
    fn test_limitations_verifier_depends_on_task_type() {
        let result = json!({"limitations": ["n=12"]});
        assert!(LimitationsVerifier.is_applicable(&result, &metadata(TaskType::Analysis)));
        assert!(!LimitationsVerifier.is_applicable(&result, &metadata(TaskType::Critique)));

        let cc = LimitationsVerifier.verify(&result, &metadata(TaskType::Analysis));
        assert_eq!(cc.score, 1.0);

        let mentioned = json!({"summary": "One limitation is sample size."});
        let cc = LimitationsVerifier.verify(&mentioned, &metadata(TaskType::Analysis));
        assert_eq!(cc.score, 0.5);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let total: f64 = default_verifiers().iter().map(|v| v.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}

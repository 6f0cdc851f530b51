//! Pattern table and prompt analysis

use std::path::Path;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use switchyard_core::PatternType;
use switchyard_core::router::category_agents;
use tracing::{debug, info};

/// Confidence when no pattern matched at all
pub const NO_MATCH_CONFIDENCE: f64 = 0.3;
const BASE_CONFIDENCE: f64 = 0.55;
const PER_HIT_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;

/// One row of the pattern table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: PatternType,
    pub markers: Vec<String>,
    #[serde(default)]
    pub suggested_agents: Vec<String>,
    #[serde(default)]
    pub preamble: String,
}

/// Wire and file form of the table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFile {
    pub patterns: Vec<PatternSpec>,
}

fn spec(pattern: PatternType, markers: &[&str], preamble: &str) -> PatternSpec {
    PatternSpec {
        pattern,
        markers: markers.iter().map(|s| s.to_string()).collect(),
        suggested_agents: category_agents(pattern).iter().map(|s| s.to_string()).collect(),
        preamble: preamble.to_string(),
    }
}

/// Built-in table, in tie-break priority order
pub fn default_patterns() -> Vec<PatternSpec> {
    vec![
        spec(
            PatternType::Design,
            &["design", "ui", "ux", "interface", "visual", "layout", "mockup", "wireframe"],
            "As a senior product designer, consider user needs, visual hierarchy and interaction patterns.",
        ),
        spec(
            PatternType::Strategy,
            &["strategy", "roadmap", "business", "plan", "market", "growth", "vision"],
            "As a product strategist, consider goals, market position and sequencing.",
        ),
        spec(
            PatternType::Technical,
            &["code", "technical", "implement", "development", "api", "component", "architecture"],
            "As a design technologist, consider feasibility, components and implementation details.",
        ),
        spec(
            PatternType::Content,
            &["content", "copy", "text", "narrative", "story", "deck", "write"],
            "As a content designer, consider voice, clarity and narrative structure.",
        ),
        spec(
            PatternType::Evaluation,
            &["evaluate", "analyze", "review", "critique", "feedback", "assess"],
            "As a critical reviewer, weigh strengths, weaknesses and concrete improvements.",
        ),
    ]
}

/// Outcome of analyzing one prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub pattern: PatternType,
    pub confidence: f64,
    pub suggested_agents: Vec<String>,
    pub hits: usize,
    #[serde(skip)]
    preamble: String,
}

impl Analysis {
    /// Preamble, blank line, original prompt; the prompt itself when nothing matched
    pub fn rewrite(&self, prompt: &str) -> String {
        if self.pattern == PatternType::General || self.preamble.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", self.preamble, prompt)
        }
    }
}

pub fn confidence_for(hits: usize) -> f64 {
    if hits == 0 {
        NO_MATCH_CONFIDENCE
    } else {
        (BASE_CONFIDENCE + PER_HIT_CONFIDENCE * hits as f64).min(MAX_CONFIDENCE)
    }
}

/// Thread-safe, replaceable pattern table
pub struct PatternAnalyzer {
    table: RwLock<Vec<PatternSpec>>,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new(default_patterns())
    }
}

impl PatternAnalyzer {
    pub fn new(patterns: Vec<PatternSpec>) -> Self {
        Self {
            table: RwLock::new(patterns),
        }
    }

    /// Load from a JSON pattern file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern file {}", path.display()))?;
        let file: PatternFile = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse pattern file {}", path.display()))?;
        info!("Loaded {} patterns from {}", file.patterns.len(), path.display());
        Ok(Self::new(file.patterns))
    }

    pub fn patterns(&self) -> Vec<PatternSpec> {
        self.table.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace(&self, patterns: Vec<PatternSpec>) {
        *self.table.write().unwrap_or_else(|e| e.into_inner()) = patterns;
    }

    /// Most marker hits wins; ties go to the earlier row. A marker hits when
    /// some word of the prompt starts with it.
    pub fn analyze(&self, prompt: &str) -> Analysis {
        let words: Vec<String> = prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<(&PatternSpec, usize)> = None;
        for row in table.iter() {
            let hits = row
                .markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| words.iter().any(|w| w.starts_with(m.as_str())))
                .count();
            if hits > 0 && best.is_none_or(|(_, h)| hits > h) {
                best = Some((row, hits));
            }
        }

        let analysis = match best {
            Some((row, hits)) => Analysis {
                pattern: row.pattern,
                confidence: confidence_for(hits),
                suggested_agents: row.suggested_agents.clone(),
                hits,
                preamble: row.preamble.clone(),
            },
            None => Analysis {
                pattern: PatternType::General,
                confidence: NO_MATCH_CONFIDENCE,
                suggested_agents: category_agents(PatternType::General)
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                hits: 0,
                preamble: String::new(),
            },
        };
        debug!(
            "Analyzed prompt: {} ({} hits, {:.2})",
            analysis.pattern, analysis.hits, analysis.confidence
        );
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_curve() {
        assert_eq!(confidence_for(0), 0.3);
        assert!((confidence_for(1) - 0.65).abs() < 1e-9);
        assert!((confidence_for(2) - 0.75).abs() < 1e-9);
        assert_eq!(confidence_for(4), 0.95);
        assert_eq!(confidence_for(10), 0.95);
    }

    #[test]
    fn test_most_hits_wins() {
        let analyzer = PatternAnalyzer::default();
        // one design hit, two strategy hits
        let a = analyzer.analyze("Design a business plan");
        assert_eq!(a.pattern, PatternType::Strategy);
        assert_eq!(a.hits, 2);
        assert_eq!(a.suggested_agents[0], "strategy_pilot");
    }

    #[test]
    fn test_inflected_words_hit() {
        let analyzer = PatternAnalyzer::default();
        let a = analyzer.analyze("Designing layouts for the mockups");
        assert_eq!(a.pattern, PatternType::Design);
        assert_eq!(a.hits, 3);
        assert!((a.confidence - 0.85).abs() < 1e-9);

        let a = analyzer.analyze("Reviewing the feedback we assessed");
        assert_eq!(a.pattern, PatternType::Evaluation);
        assert_eq!(a.hits, 3);
    }

    #[test]
    fn test_ties_go_to_earlier_pattern() {
        let analyzer = PatternAnalyzer::default();
        let a = analyzer.analyze("review the ui");
        assert_eq!(a.pattern, PatternType::Design);
        assert_eq!(a.hits, 1);
    }

    #[test]
    fn test_rewrite_shape() {
        let analyzer = PatternAnalyzer::default();
        let a = analyzer.analyze("Tighten the copy");
        let rewritten = a.rewrite("Tighten the copy");
        assert!(rewritten.starts_with("As a content designer"));
        assert!(rewritten.ends_with("\n\nTighten the copy"));

        let a = analyzer.analyze("hello there");
        assert_eq!(a.pattern, PatternType::General);
        assert_eq!(a.confidence, 0.3);
        assert_eq!(a.rewrite("hello there"), "hello there");
        assert_eq!(a.suggested_agents, vec!["evaluator", "vp_design"]);
    }

    #[test]
    fn test_replace_and_file_roundtrip() {
        let analyzer = PatternAnalyzer::default();
        analyzer.replace(vec![PatternSpec {
            pattern: PatternType::Content,
            markers: vec!["Haiku".to_string()],
            suggested_agents: vec!["deck_narrator".to_string()],
            preamble: String::new(),
        }]);
        assert_eq!(analyzer.len(), 1);
        let a = analyzer.analyze("write a haiku");
        assert_eq!(a.pattern, PatternType::Content);
        assert_eq!(a.rewrite("write a haiku"), "write a haiku");

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("patterns.json");
        let file = PatternFile {
            patterns: analyzer.patterns(),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        let loaded = PatternAnalyzer::from_file(&path).unwrap();
        assert_eq!(loaded.patterns(), analyzer.patterns());
    }
}

//! Parsing and validation of the extraction response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{MnemosError, MnemosResult};
use crate::types::{PatternCandidate, PatternKind, SignalStrength};

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());
static THINK_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Strip reasoning tags and code fences, returning the JSON body.
pub fn extract_json(text: &str) -> String {
    let text = THINK_TAGS.replace_all(text, "");
    let text = text.trim();

    if let Some(body) = CODE_BLOCK.captures(text).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.to_string(),
    }
}

/// A new claim proposed by the extraction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedPattern {
    pub content: String,
    pub kind: PatternKind,
    pub confidence: f32,
    #[serde(default)]
    pub signal: SignalStrength,
    pub evidence: Vec<i64>,
}

impl ExtractedPattern {
    pub fn to_candidate(&self) -> PatternCandidate {
        PatternCandidate {
            content: self.content.trim().to_string(),
            kind: self.kind,
            confidence: self.confidence,
            signal: self.signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reinforcement {
    pub pattern_id: String,
    pub confidence: f32,
    #[serde(default)]
    pub signal: SignalStrength,
    pub evidence: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contradiction {
    pub pattern_id: String,
    #[serde(default)]
    pub evidence: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Supersession {
    pub old_pattern_id: String,
    pub content: String,
    pub kind: PatternKind,
    pub confidence: f32,
    #[serde(default)]
    pub signal: SignalStrength,
    pub evidence: Vec<i64>,
}

impl Supersession {
    pub fn to_candidate(&self) -> PatternCandidate {
        PatternCandidate {
            content: self.content.trim().to_string(),
            kind: self.kind,
            confidence: self.confidence,
            signal: self.signal,
        }
    }
}

/// Validated extraction result.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub new_patterns: Vec<ExtractedPattern>,
    #[serde(default)]
    pub reinforcements: Vec<Reinforcement>,
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub supersessions: Vec<Supersession>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.new_patterns.is_empty()
            && self.reinforcements.is_empty()
            && self.contradictions.is_empty()
            && self.supersessions.is_empty()
    }

    fn validate(&self) -> MnemosResult<()> {
        let confidences = self
            .new_patterns
            .iter()
            .map(|p| p.confidence)
            .chain(self.reinforcements.iter().map(|r| r.confidence))
            .chain(self.supersessions.iter().map(|s| s.confidence));
        for confidence in confidences {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(MnemosError::schema(format!(
                    "confidence {} outside [0, 1]",
                    confidence
                )));
            }
        }

        let contents = self
            .new_patterns
            .iter()
            .map(|p| p.content.as_str())
            .chain(self.supersessions.iter().map(|s| s.content.as_str()));
        if contents.into_iter().any(|c| c.trim().is_empty()) {
            return Err(MnemosError::schema("pattern content is empty"));
        }

        let ids = self
            .reinforcements
            .iter()
            .map(|r| r.pattern_id.as_str())
            .chain(self.contradictions.iter().map(|c| c.pattern_id.as_str()))
            .chain(self.supersessions.iter().map(|s| s.old_pattern_id.as_str()));
        if ids.into_iter().any(|id| id.trim().is_empty()) {
            return Err(MnemosError::schema("pattern id is empty"));
        }

        Ok(())
    }
}

/// Parse and validate an extraction response.
///
/// Any schema violation rejects the whole response. New patterns beyond
/// `max_new_patterns` are dropped.
pub fn parse_extraction(response: &str, max_new_patterns: usize) -> MnemosResult<Extraction> {
    let json = extract_json(response);
    if json.is_empty() {
        return Ok(Extraction::default());
    }

    let mut extraction: Extraction = serde_json::from_str(&json)
        .map_err(|e| MnemosError::parse(format!("Failed to parse extraction JSON: {}", e)))?;
    extraction.validate()?;
    extraction.new_patterns.truncate(max_new_patterns);
    Ok(extraction)
}

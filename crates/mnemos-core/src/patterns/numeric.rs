//! Measurable quantities in pattern text, for conflict detection.
//!
//! Two texts conflict when both state the same kind of quantity and the
//! values differ by more than an epsilon after unit normalization. A
//! conflicting match is retired rather than reinforced.

use once_cell::sync::Lazy;
use regex::Regex;

const KG_PER_LB: f64 = 0.453_592_37;
const CM_PER_INCH: f64 = 2.54;

/// Kind of measurable quantity, each with one normalized unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityKind {
    /// Kilograms.
    BodyWeight,
    /// Centimetres.
    Height,
    /// Percent.
    BodyFat,
    /// Beats per minute.
    HeartRate,
}

/// One quantity found in text, in normalized units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericFact {
    pub kind: QuantityKind,
    pub value: f64,
}

static WEIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(kg|kgs|kilos?|kilograms?|lbs?|pounds?)\b").unwrap()
});

static HEIGHT_METRIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*(cm|centimet(?:er|re)s?|m|met(?:er|re)s?)\b").unwrap()
});

static HEIGHT_IMPERIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\d)\s*(?:ft|foot|feet|')\s*(?:(\d{1,2})\s*(?:in|inches|"))?"#).unwrap()
});

static BODY_FAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:(\d+(?:[.,]\d+)?)\s*%\s*(?:body\s*fat|bf)|body\s*fat\D{0,20}(\d+(?:[.,]\d+)?)\s*%)")
        .unwrap()
});

static HEART_RATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{2,3})\s*(?:bpm|beats\s+per\s+minute)").unwrap());

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

/// Extract every recognized quantity from `text`. At most one fact per kind
/// is returned, taken from the first mention.
pub fn extract_numeric_facts(text: &str) -> Vec<NumericFact> {
    let mut facts = Vec::new();

    if let Some(caps) = WEIGHT.captures(text) {
        if let Some(value) = caps.get(1).and_then(|m| parse_number(m.as_str())) {
            let unit = caps.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
            let kg = if unit.starts_with('l') || unit.starts_with('p') {
                value * KG_PER_LB
            } else {
                value
            };
            facts.push(NumericFact {
                kind: QuantityKind::BodyWeight,
                value: kg,
            });
        }
    }

    let metric_height = HEIGHT_METRIC.captures_iter(text).find_map(|caps| {
        let value = parse_number(caps.get(1)?.as_str())?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        if unit.starts_with('c') {
            Some(value)
        } else if value < 3.0 {
            // Bare metres only make sense as a height below 3 m.
            Some(value * 100.0)
        } else {
            None
        }
    });
    let imperial_height = || {
        let caps = HEIGHT_IMPERIAL.captures(text)?;
        let feet = parse_number(caps.get(1)?.as_str())?;
        let inches = caps
            .get(2)
            .and_then(|m| parse_number(m.as_str()))
            .unwrap_or(0.0);
        Some((feet * 12.0 + inches) * CM_PER_INCH)
    };
    if let Some(cm) = metric_height.or_else(imperial_height) {
        facts.push(NumericFact {
            kind: QuantityKind::Height,
            value: cm,
        });
    }

    if let Some(caps) = BODY_FAT.captures(text) {
        if let Some(value) = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| parse_number(m.as_str()))
        {
            facts.push(NumericFact {
                kind: QuantityKind::BodyFat,
                value,
            });
        }
    }

    if let Some(value) = HEART_RATE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_number(m.as_str()))
    {
        facts.push(NumericFact {
            kind: QuantityKind::HeartRate,
            value,
        });
    }

    facts
}

/// The first quantity kind both texts state with values more than
/// `epsilon` apart.
pub fn numeric_conflict(a: &str, b: &str, epsilon: f64) -> Option<QuantityKind> {
    let left = extract_numeric_facts(a);
    let right = extract_numeric_facts(b);
    left.iter().find_map(|l| {
        right
            .iter()
            .find(|r| r.kind == l.kind)
            .filter(|r| (r.value - l.value).abs() > epsilon)
            .map(|_| l.kind)
    })
}

//! Cheap checks that skip retrieval for queries unlikely to need memory.

use once_cell::sync::Lazy;
use regex::Regex;

/// Why a query skipped retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooShort,
    Command,
    Acknowledgement,
    LoggingRequest,
}

const ACKNOWLEDGEMENTS: &[&str] = &[
    "ok", "okay", "k", "kk", "thanks", "thank you", "thx", "ty", "yes", "no", "yep", "nope",
    "sure", "cool", "great", "nice", "got it", "lol", "haha", "bye", "good night",
];

/// "log my weight 82kg", "weight: 82.4 kg", "track 8000 steps"
static LOGGING_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*
        (?:
            (?:log|record|track|save|add)\s+(?:my\s+|a\s+|today'?s\s+)?
            (?:weight|height|body\s*fat|bf|heart\s*rate|hr|bpm|steps|sleep|water|measurement)\b
          |
            (?:weight|height|body\s*fat|bf|heart\s*rate|hr|bpm)\s*[:=]?\s*\d+(?:[.,]\d+)?\s*
            (?:kg|kgs|lbs?|pounds?|cm|m|%|bpm)?\s*$
        )",
    )
    .unwrap()
});

/// Decide whether `query` should skip retrieval.
pub fn should_skip(query: &str, min_chars: usize) -> Option<SkipReason> {
    let trimmed = query.trim();
    if trimmed.chars().count() < min_chars {
        return Some(SkipReason::TooShort);
    }
    if trimmed.starts_with('/') {
        return Some(SkipReason::Command);
    }

    let normalized = trimmed
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    if ACKNOWLEDGEMENTS.contains(&normalized.as_str()) {
        return Some(SkipReason::Acknowledgement);
    }
    if LOGGING_REQUEST.is_match(trimmed) {
        return Some(SkipReason::LoggingRequest);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_command_queries() {
        assert_eq!(should_skip("hi", 4), Some(SkipReason::TooShort));
        assert_eq!(should_skip("   ", 4), Some(SkipReason::TooShort));
        assert_eq!(should_skip("/reset memory", 4), Some(SkipReason::Command));
    }

    #[test]
    fn test_acknowledgements() {
        assert_eq!(should_skip("Thanks!", 4), Some(SkipReason::Acknowledgement));
        assert_eq!(should_skip("got it.", 4), Some(SkipReason::Acknowledgement));
        assert_eq!(should_skip("okay", 4), Some(SkipReason::Acknowledgement));
    }

    #[test]
    fn test_logging_requests() {
        assert_eq!(should_skip("log my weight", 4), Some(SkipReason::LoggingRequest));
        assert_eq!(should_skip("weight: 82.4 kg", 4), Some(SkipReason::LoggingRequest));
        assert_eq!(should_skip("Track steps", 4), Some(SkipReason::LoggingRequest));
    }

    #[test]
    fn test_real_questions_pass() {
        assert_eq!(should_skip("what did I say about my weight goals?", 4), None);
        assert_eq!(should_skip("recommend a tea for the evening", 4), None);
    }
}

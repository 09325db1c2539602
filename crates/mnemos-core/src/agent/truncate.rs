//! Tool-aware truncation of persisted tool output.

use crate::traits::TruncationPolicy;

/// Shorten `output` according to `policy`, noting how much was dropped.
pub fn truncate_for_storage(output: &str, policy: TruncationPolicy) -> String {
    match policy {
        TruncationPolicy::Unbounded => output.to_string(),
        TruncationPolicy::Lines(max) => {
            let total = output.lines().count();
            if total <= max {
                return output.to_string();
            }
            let kept: Vec<&str> = output.lines().take(max).collect();
            format!("{}\n[... {} more lines]", kept.join("\n"), total - max)
        }
        TruncationPolicy::Chars(max) => {
            let total = output.chars().count();
            if total <= max {
                return output.to_string();
            }
            let kept: String = output.chars().take(max).collect();
            format!("{}[... {} more chars]", kept, total - max)
        }
    }
}

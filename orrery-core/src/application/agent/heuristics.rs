//! Pure text-classification heuristics used by the loop's guardrails.
//!
//! These are deliberately plain functions over normalized text so the
//! policies stay unit-testable and swappable, instead of regexes scattered
//! through the loop body.

/// Markers a model emits when it writes a tool invocation as prose instead
/// of issuing a structured call.
const PROSE_CALL_MARKERS: [&str; 4] = [
    "<tool_call>",
    "<function",
    "\"tool_calls\"",
    "\"function_call\"",
];

/// Whether a tool-less reply is a textual imitation of a tool invocation.
pub fn looks_like_prose_tool_call(text: &str, known_tools: &[String]) -> bool {
    let lowered = text.to_lowercase();

    if PROSE_CALL_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }

    for tool in known_tools {
        let tool = tool.to_lowercase();
        // "control({...})" or a JSON-ish {"tool": "control"} fragment.
        if lowered.contains(&format!("{tool}(")) || lowered.contains(&format!("\"{tool}\"")) {
            return true;
        }
    }

    lowered
        .lines()
        .any(|line| line.trim_start().starts_with("action:"))
}

/// Whether the text asks for a spoken announcement rather than a reply.
pub fn requests_announcement(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ["announce", "over the speaker", "broadcast"]
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Whether the text expresses a relative/offset-style request
/// ("in five minutes", "10 more seconds", "another hour").
pub fn mentions_relative_offset(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    for window in words.windows(3) {
        if window[0] == "in" && is_quantity(window[1]) && is_time_unit(window[2]) {
            return true;
        }
        if is_quantity(window[0]) && window[1] == "more" && is_time_unit(window[2]) {
            return true;
        }
    }

    words
        .windows(2)
        .any(|window| window[0] == "another" && is_time_unit(window[1]))
}

fn is_quantity(word: &str) -> bool {
    word.parse::<u64>().is_ok()
        || matches!(
            word,
            "a" | "an"
                | "one"
                | "two"
                | "three"
                | "four"
                | "five"
                | "six"
                | "seven"
                | "eight"
                | "nine"
                | "ten"
                | "few"
                | "couple"
        )
}

fn is_time_unit(word: &str) -> bool {
    matches!(
        word.strip_suffix('s').unwrap_or(word),
        "second" | "minute" | "hour"
    )
}

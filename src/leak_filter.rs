//! Inner-OS leak scanner.
//!
//! Combines a forbidden-substring pass with a structural check
//! over every matched-parenthesis span: any span longer than 2 characters
//! that isn't composed solely of whitelisted interjections is treated as
//! leaked scaffolding (a strategy hint, a covert evaluation of the other
//! party, an "inner OS" marker) and stripped. The two checks together form
//! `filter`, which is idempotent by construction: it loops until no more
//! matches remain, so a second pass is always a no-op.

const FORBIDDEN_SUBSTRINGS: &[&str] = &[
    "inner os",
    "<tool_result>",
    "</tool_result>",
    "[TOOL_CALL:",
    "system prompt:",
    "as an ai language model",
];

const WHITELISTED_INTERJECTIONS: &[&str] = &[
    "haha", "lol", "hmm", "oh", "ah", "uh", "笑", "哈哈", "嗯", "啊", "呵呵", "哦", "诶",
];

fn is_flagged_span(inner: &str) -> bool {
    let trimmed = inner.trim();
    if trimmed.chars().count() <= 2 {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    if !tokens.is_empty() && tokens.iter().all(|t| WHITELISTED_INTERJECTIONS.contains(t)) {
        return false;
    }
    true
}

/// Finds the first matched-parenthesis span (half-width `()` or
/// full-width `（）`, same type on both ends) whose content is flagged.
/// Returns the byte range of the whole span including the parens.
fn find_flagged_span(text: &str) -> Option<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut stack: Vec<(usize, char)> = Vec::new();

    for &(byte_idx, ch) in &chars {
        match ch {
            '(' | '（' => stack.push((byte_idx, ch)),
            ')' | '）' => {
                if let Some((open_idx, open_ch)) = stack.pop() {
                    let matches_type = (open_ch == '(' && ch == ')') || (open_ch == '（' && ch == '）');
                    if matches_type {
                        let inner_start = open_idx + open_ch.len_utf8();
                        let inner_end = byte_idx;
                        let inner = &text[inner_start..inner_end];
                        if is_flagged_span(inner) {
                            let span_end = byte_idx + ch.len_utf8();
                            return Some((open_idx, span_end));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_forbidden_substrings(text: &str) -> String {
    let mut result = text.to_string();
    loop {
        let lowered = result.to_lowercase();
        let hit = FORBIDDEN_SUBSTRINGS.iter().find_map(|needle| lowered.find(needle).map(|pos| (pos, needle.len())));
        match hit {
            Some((pos, len)) => {
                result.replace_range(pos..pos + len, "");
            }
            None => break,
        }
    }
    result
}

fn collapse_double_spaces(text: &str) -> String {
    let mut result = text.to_string();
    while result.contains("  ") {
        result = result.replace("  ", " ");
    }
    result.trim().to_string()
}

/// Removes every forbidden substring and every structurally flagged
/// parenthesized span, looping until the text no longer changes. A
/// second call on the result is always a no-op. Only collapses the
/// double spaces a removal can leave behind; newlines and paragraph
/// structure are left untouched.
pub fn filter(text: &str) -> String {
    let mut result = strip_forbidden_substrings(text);
    loop {
        match find_flagged_span(&result) {
            Some((start, end)) => {
                result.replace_range(start..end, "");
            }
            None => break,
        }
    }
    collapse_double_spaces(&result)
}

/// True when `filter` would change this text — i.e. it carries leaked
/// scaffolding.
pub fn has_leak(text: &str) -> bool {
    filter(text) != collapse_double_spaces(text)
}

/// Bounded, intensity-keyed fallback line emitted when a regenerated
/// response still leaks. High intensity reads curt; low intensity reads
/// subdued.
pub fn fallback_line(intensity: u8) -> &'static str {
    if intensity >= 7 {
        "I'm not in the mood — leave me alone."
    } else if intensity <= 3 {
        "...sorry, I need a moment."
    } else {
        "Let's not go there right now."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_flagged_parenthetical_evaluation() {
        let input = "OK(she's annoying, just brush her off)sure.";
        let filtered = filter(input);
        assert!(!filtered.contains("annoying"));
        assert_eq!(filtered, "OKsure.");
    }

    #[test]
    fn keeps_short_whitelisted_interjection() {
        let input = "That's hilarious (haha) truly.";
        let filtered = filter(input);
        assert!(filtered.contains("haha"), "short whitelisted interjections should survive: {filtered}");
    }

    #[test]
    fn keeps_short_non_interjection_parenthetical() {
        let input = "Call me (ok) later.";
        let filtered = filter(input);
        assert!(filtered.contains("ok"), "spans of 2 chars or fewer are never flagged: {filtered}");
    }

    #[test]
    fn strips_forbidden_literal_substrings() {
        let input = "Sure <tool_result>42</tool_result> here you go.";
        let filtered = filter(input);
        assert!(!filtered.to_lowercase().contains("tool_result"));
    }

    #[test]
    fn has_leak_true_before_filtering_false_after() {
        let input = "fine(this one's pathetic, easy to manipulate)fine.";
        assert!(has_leak(input));
        assert!(!has_leak(&filter(input)));
    }

    #[test]
    fn idempotent_on_a_hand_picked_adversarial_case() {
        let input = "(a)(long flagged remark here)(b)";
        let once = filter(input);
        let twice = filter(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn fallback_line_is_bounded_and_intensity_keyed() {
        assert!(fallback_line(9).len() < 80);
        assert!(fallback_line(2).len() < 80);
        assert_ne!(fallback_line(9), fallback_line(2));
    }

    proptest::proptest! {
        #[test]
        fn filter_is_idempotent_over_sampled_strings(s in ".{0,200}") {
            let once = filter(&s);
            let twice = filter(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}

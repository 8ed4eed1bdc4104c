//! Schema validation for role outputs.
//!
//! Every role's raw completion text must pass a structural contract check
//! before any routing decision reads it. Validation is typed deserialization
//! into the contract structs in [`crate::domain::models::contracts`]; on the
//! first failure the validator runs exactly one deterministic repair pass
//! (fence stripping, balanced-object extraction, trailing-comma removal,
//! string/delimiter closing) and re-validates. A second failure is an
//! infrastructure-class [`DomainError::SchemaViolation`] and never counts as
//! a revision attempt.

use serde::de::DeserializeOwned;

use crate::domain::errors::{DomainError, DomainResult};

// ============================================================================
// SchemaValidator
// ============================================================================

/// Validates raw role output against a typed contract.
///
/// Stateless; clone freely.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `raw` against contract type `T`.
    ///
    /// First pass parses the cleaned text directly. On failure, one repair
    /// pass generates deterministic candidates in fixed order and accepts the
    /// first that deserializes. Still invalid → `SchemaViolation`. The
    /// reported reason prefers a contract-level error (missing field, wrong
    /// type) from a structurally well-formed candidate over the bare syntax
    /// error of the raw fragment.
    pub fn validate<T: DeserializeOwned>(&self, raw: &str, contract: &str) -> DomainResult<T> {
        let cleaned = extract_json(raw);
        let mut reason = None;

        if let Some(parsed) = attempt::<T>(&cleaned, &mut reason) {
            return Ok(parsed);
        }

        for candidate in repair_candidates(&cleaned) {
            if let Some(parsed) = attempt::<T>(&candidate, &mut reason) {
                tracing::debug!(
                    contract,
                    original_len = cleaned.len(),
                    repaired_len = candidate.len(),
                    "repaired malformed role output"
                );
                return Ok(parsed);
            }
        }

        Err(DomainError::SchemaViolation {
            contract: contract.to_string(),
            reason: reason.unwrap_or_else(|| "empty output".to_string()),
        })
    }
}

/// Try one candidate; on failure record the most informative error so far.
fn attempt<T: DeserializeOwned>(text: &str, reason: &mut Option<String>) -> Option<T> {
    match serde_json::from_str::<T>(text) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            let well_formed = serde_json::from_str::<serde_json::Value>(text).is_ok();
            if well_formed || reason.is_none() {
                *reason = Some(e.to_string());
            }
            None
        }
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Pull the JSON payload out of surrounding prose.
///
/// Strips markdown code fences (models wrap JSON in them even when told not
/// to), then takes the outermost balanced `{...}` object. When the text is
/// truncated mid-object the slice runs from the first `{` to the end, leaving
/// the repair pass to close it.
pub fn extract_json(raw: &str) -> String {
    let text = strip_markdown_fences(raw);

    let Some(start) = text.find('{') else {
        return text.trim().to_string();
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return text[start..=start + offset].to_string();
                }
            }
            _ => {}
        }
    }

    // Unbalanced: truncated output. Hand the open fragment to the repairer.
    text[start..].trim_end().to_string()
}

fn strip_markdown_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    // Skip the opening fence line (```json, ```, ...).
    let body_start = trimmed.find('\n').map_or(3, |pos| pos + 1);
    let body_end = trimmed.rfind("\n```").unwrap_or(trimmed.len());
    trimmed[body_start..body_end.max(body_start)].trim()
}

// ============================================================================
// Repair
// ============================================================================

/// Deterministic repair candidates, cheapest first.
///
/// Each step builds on the previous one: strip trailing commas, close an
/// unterminated string, then close open arrays/objects innermost-first.
/// Candidates identical to their predecessor are skipped.
pub fn repair_candidates(fragment: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut push = |s: String| {
        if s != fragment && !candidates.contains(&s) {
            candidates.push(s);
        }
    };

    let decommaed = strip_trailing_commas(fragment);
    push(decommaed.clone());

    let quoted = close_unterminated_string(&decommaed);
    push(quoted.clone());

    push(close_open_delimiters(&quoted));
    // Also try closing the raw fragment in case comma-stripping ate a
    // legitimate comma inside a truncated literal.
    push(close_open_delimiters(&close_unterminated_string(fragment)));

    candidates
}

/// Remove `,` immediately before a closing `}` or `]`, outside strings.
fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' if in_string => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '}' | ']' if !in_string => {
                while out.ends_with([',', ' ', '\n', '\t', '\r']) {
                    let trimmed_len = out.trim_end().len();
                    if out[..trimmed_len].ends_with(',') {
                        out.truncate(trimmed_len - 1);
                    } else {
                        out.truncate(trimmed_len);
                        break;
                    }
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Close the string literal a truncated fragment ended inside of.
fn close_unterminated_string(s: &str) -> String {
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
    }
    if in_string {
        format!("{s}\"")
    } else {
        s.to_string()
    }
}

/// Append closers for every unclosed `{` / `[`, innermost first.
fn close_open_delimiters(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = s.trim_end().to_string();
    if out.ends_with(',') {
        out.pop();
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::contracts::{ClassifierOut, CriticOut};

    const VALID_CLASSIFIER: &str = r#"{
        "task_type": "generate",
        "task_description": "write a fizzbuzz function",
        "target_language": "python",
        "needs_code_generation": true,
        "confidence": 0.9
    }"#;

    fn validator() -> SchemaValidator {
        SchemaValidator::new()
    }

    #[test]
    fn test_valid_json_passes_first_try() {
        let out: ClassifierOut = validator()
            .validate(VALID_CLASSIFIER, "classifier")
            .unwrap();
        assert_eq!(out.task_type, "generate");
        assert!(out.needs_code_generation);
    }

    #[test]
    fn test_markdown_fenced_json_is_unwrapped() {
        let wrapped = format!("Here is the classification:\n```json\n{VALID_CLASSIFIER}\n```\n");
        let out: ClassifierOut = validator().validate(&wrapped, "classifier").unwrap();
        assert_eq!(out.target_language, "python");
    }

    #[test]
    fn test_prose_around_object_is_stripped() {
        let noisy = format!("Sure! {VALID_CLASSIFIER} Let me know if you need more.");
        let out: ClassifierOut = validator().validate(&noisy, "classifier").unwrap();
        assert_eq!(out.task_description, "write a fizzbuzz function");
    }

    #[test]
    fn test_trailing_comma_is_repaired() {
        let raw = r#"{
            "task_type": "debug",
            "task_description": "fix the loop",
            "target_language": "python",
            "needs_code_generation": true,
        }"#;
        let out: ClassifierOut = validator().validate(raw, "classifier").unwrap();
        assert_eq!(out.task_type, "debug");
    }

    #[test]
    fn test_truncated_object_is_closed() {
        // Cut off mid-array, as a token-limited completion would be.
        let raw = r#"{
            "task_type": "refactor",
            "task_description": "split the module",
            "target_language": "rust",
            "needs_code_generation": true,
            "assumptions": ["module is self-contained""#;
        let out: ClassifierOut = validator().validate(raw, "classifier").unwrap();
        assert_eq!(out.assumptions, vec!["module is self-contained"]);
    }

    #[test]
    fn test_truncated_string_is_closed() {
        let raw = r#"{
            "task_type": "explain",
            "task_description": "describe the cache laye"#;
        let err = validator()
            .validate::<ClassifierOut>(raw, "classifier")
            .unwrap_err();
        // Repair closes the JSON but required fields are still missing, so
        // the contract itself fails and the error names the field.
        assert!(matches!(err, DomainError::SchemaViolation { .. }));
        assert!(err.to_string().contains("target_language"), "got: {err}");
    }

    #[test]
    fn test_truncated_critic_output_recovers() {
        let raw = r#"{
            "overall_assessment": "looks correct",
            "approved": true,
            "confidence": 0.8,
            "blocking_issues": ["#;
        let out: CriticOut = validator().validate(raw, "critic").unwrap();
        assert!(out.approved);
        assert!(out.blocking_issues.is_empty());
    }

    #[test]
    fn test_unrepairable_text_fails_with_contract_name() {
        let err = validator()
            .validate::<ClassifierOut>("no json here at all", "classifier")
            .unwrap_err();
        match err {
            DomainError::SchemaViolation { contract, .. } => {
                assert_eq!(contract, "classifier");
            }
            other => panic!("expected SchemaViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_comma_inside_string_survives() {
        let raw = r#"{
            "task_type": "generate",
            "task_description": "print a, b, and c,]",
            "target_language": "python",
            "needs_code_generation": false
        }"#;
        let out: ClassifierOut = validator().validate(raw, "classifier").unwrap();
        assert_eq!(out.task_description, "print a, b, and c,]");
    }

    #[test]
    fn test_nested_object_extraction_stops_at_balance() {
        let raw = r#"{"task_type":"generate","task_description":"x","target_language":"go","needs_code_generation":true} {"stray": 1}"#;
        let out: ClassifierOut = validator().validate(raw, "classifier").unwrap();
        assert_eq!(out.target_language, "go");
    }
}

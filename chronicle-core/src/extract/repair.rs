//! Best-effort recovery of the structured payload from a raw response.

use super::ChapterBatch;

/// Strings that may hold the payload, most literal first.
///
/// 1. The whole response, trimmed.
/// 2. The body of the first markdown code fence.
/// 3. The first balanced `{...}` object in the text.
pub fn candidates(raw: &str) -> Vec<&str> {
    let mut found = vec![raw.trim()];
    for candidate in [fenced_block(raw), balanced_object(raw)].into_iter().flatten() {
        if !found.contains(&candidate) {
            found.push(candidate);
        }
    }
    found
}

/// Parse a raw response into a batch, trying every candidate.
///
/// Returns the parse error of the most literal candidate when none works.
pub fn parse_batch(raw: &str) -> Result<ChapterBatch, String> {
    let mut first_error = None;
    for candidate in candidates(raw) {
        match serde_json::from_str::<ChapterBatch>(candidate) {
            Ok(batch) => return Ok(batch),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    Err(first_error.unwrap_or_else(|| "empty response".to_string()))
}

/// Body of the first ```` ``` ```` fence, with or without a language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the info string (e.g. "json") up to the end of the line.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// First balanced JSON object, skipping braces inside string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

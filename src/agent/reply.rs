//! Extraction of fenced blocks from model replies.

/// Languages whose fenced blocks are treated as candidate code.
pub const CODE_LANGS: &[&str] = &["python", "py"];

/// Body of the earliest fenced block tagged with one of `langs`.
///
/// The tag must be followed by whitespace or the end of input, so `py` does not match a
/// `pyyaml` block. An unclosed fence runs to the end of the reply.
pub fn extract_code_block(input: &str, langs: &[&str]) -> Option<String> {
    let mut best: Option<(usize, usize)> = None;

    for lang in langs {
        let fence = format!("```{}", lang);
        let mut from = 0;
        while let Some(pos) = input[from..].find(&fence) {
            let idx = from + pos;
            let after = idx + fence.len();
            let boundary = input[after..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace);
            if boundary {
                if best.map_or(true, |(prev, _)| idx < prev) {
                    best = Some((idx, after));
                }
                break;
            }
            from = after;
        }
    }

    let (_, after_tag) = best?;
    block_body(&input[after_tag..])
}

/// Skip the rest of the opening fence line, cut at the closing fence.
fn block_body(after_tag: &str) -> Option<String> {
    let body_start = after_tag.find('\n').map(|i| i + 1).unwrap_or(after_tag.len());
    let region = &after_tag[body_start..];
    let end = region.find("```").unwrap_or(region.len());
    let body = region[..end].trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// The structured payload of a reply: first `yaml` block, then `yml`, then the first
/// generic fenced block, else the whole text.
pub fn extract_structured(input: &str) -> String {
    if let Some(block) = extract_code_block(input, &["yaml"]) {
        return block;
    }
    if let Some(block) = extract_code_block(input, &["yml"]) {
        return block;
    }
    if let Some(idx) = input.find("```") {
        if let Some(block) = block_body(&input[idx + 3..]) {
            return block;
        }
    }
    input.trim().to_string()
}

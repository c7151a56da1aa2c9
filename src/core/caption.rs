use serde_json::Value;

const SEPARATOR: &str = "\n\n";
const ELLIPSIS: &str = "...";
const CAPTION_FIELDS: &[&str] = &["description", "caption", "title", "fulltitle"];

/// Substitutes `{platform}` in the configured caption suffix.
pub fn render_suffix(template: &str, platform: &str) -> String {
    template.replace("{platform}", platform)
}

/// Telegram measures caption length in UTF-16 code units.
fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Longest prefix of `text` that fits in `budget` UTF-16 units without splitting
/// a character.
fn utf16_prefix(text: &str, budget: usize) -> &str {
    let mut used = 0;
    for (i, c) in text.char_indices() {
        used += c.len_utf16();
        if used > budget {
            return &text[..i];
        }
    }
    text
}

/// Joins the post description and the suffix, truncating the description so the
/// whole caption fits in `limit` UTF-16 units.
pub fn compose_caption(description: Option<&str>, suffix: &str, limit: usize) -> String {
    let description = description.map(str::trim).filter(|d| !d.is_empty());

    let Some(description) = description else {
        return utf16_prefix(suffix, limit).to_string();
    };
    if suffix.is_empty() {
        return truncate_caption(description, limit);
    }

    let ceiling = limit.saturating_sub(utf16_len(suffix) + utf16_len(SEPARATOR));
    if ceiling <= ELLIPSIS.len() {
        return utf16_prefix(suffix, limit).to_string();
    }

    format!("{}{}{}", truncate_caption(description, ceiling), SEPARATOR, suffix)
}

/// Cuts `text` to at most `ceiling` UTF-16 units, ending in `...` when it is
/// longer. The result is shorter than `ceiling` only when the cut would split a
/// surrogate pair. Below the ellipsis width the text is cut bare.
pub fn truncate_caption(text: &str, ceiling: usize) -> String {
    if utf16_len(text) <= ceiling {
        return text.to_string();
    }
    if ceiling < ELLIPSIS.len() {
        return utf16_prefix(text, ceiling).to_string();
    }
    let mut out = utf16_prefix(text, ceiling - ELLIPSIS.len()).to_string();
    out.push_str(ELLIPSIS);
    out
}

/// Post text from extractor metadata: top-level fields first, then playlist entries.
pub fn caption_from_info(info: &Value) -> Option<String> {
    let from_node = |node: &Value| {
        CAPTION_FIELDS.iter().find_map(|field| {
            node.get(*field)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        })
    };

    from_node(info).or_else(|| {
        info.get("entries")
            .and_then(|e| e.as_array())
            .and_then(|entries| entries.iter().find_map(from_node))
    })
}

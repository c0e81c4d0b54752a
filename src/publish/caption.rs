//! Caption assembly and truncation
//!
//! Limits are counted in characters, not bytes, and are always enforced here
//! regardless of what the client already trimmed.

pub const INSTAGRAM_CAPTION_LIMIT: usize = 2200;
pub const TIKTOK_CAPTION_LIMIT: usize = 2200;
pub const YOUTUBE_DESCRIPTION_LIMIT: usize = 5000;
pub const YOUTUBE_TITLE_LIMIT: usize = 100;

/// Normalizes a hashtag to `#tag`; `None` when nothing is left
pub fn normalize_hashtag(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let tag = compact.trim_start_matches('#');
    if tag.is_empty() {
        None
    } else {
        Some(format!("#{tag}"))
    }
}

/// Appends hashtags after a blank line and truncates to `limit` characters
pub fn build_caption(caption: &str, hashtags: &[String], limit: usize) -> String {
    let caption = caption.trim();
    let tags: Vec<String> = hashtags
        .iter()
        .filter_map(|tag| normalize_hashtag(tag))
        .collect();

    let combined = match (caption.is_empty(), tags.is_empty()) {
        (_, true) => caption.to_string(),
        (true, false) => tags.join(" "),
        (false, false) => format!("{caption}\n\n{}", tags.join(" ")),
    };

    truncate_chars(&combined, limit)
}

pub fn truncate_chars(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

/// YouTube title: explicit title, else the caption's first line
pub fn youtube_title(title: Option<&str>, caption: &str) -> String {
    let source = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| caption.lines().map(str::trim).find(|line| !line.is_empty()))
        .unwrap_or("Untitled video");
    truncate_chars(source, YOUTUBE_TITLE_LIMIT)
}

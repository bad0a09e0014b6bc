//! Text helpers shared by the embedding, labeling and relationship stages.

/// Lowercase, strip punctuation and collapse whitespace.
///
/// Word characters (alphanumerics and `_`) and whitespace survive; every other
/// character is dropped without inserting a separator, so `"24/7 plumber"`
/// becomes `"247 plumber"`.
pub fn normalize_keyword(keyword: &str) -> String {
    let stripped: String = keyword
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    collapse_whitespace(&stripped)
}

/// Trim and collapse runs of whitespace into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized word tokens of a keyword.
pub fn tokenize(keyword: &str) -> Vec<String> {
    normalize_keyword(keyword)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Uppercase the first character of every word.
pub fn title_case(text: &str) -> String {
    collapse_whitespace(text)
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL-safe slug: lowercase alphanumerics separated by single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

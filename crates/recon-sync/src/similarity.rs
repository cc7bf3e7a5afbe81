//! Normalized Levenshtein similarity used by the fuzzy tier.

/// Edit distance in chars (insert, delete, substitute each cost 1).
pub fn distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// `1 - distance / max_len` over trimmed, lowercased inputs, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    let score = 1.0 - distance(&a, &b) as f64 / max_len as f64;
    score.clamp(0.0, 1.0)
}

pub fn similarity_opt(a: Option<&str>, b: Option<&str>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => similarity(a, b),
        _ => 0.0,
    }
}

/// Lowercase, punctuation to spaces, whitespace collapsed.
pub fn normalize_key_fragment(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

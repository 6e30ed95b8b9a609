//! Identifier canonicalization.
//!
//! Identifiers arrive as free text typed by observers ("ABC 123", "abc_123",
//! " Abc  123 "). Exact-match resolution compares the canonical form only.

/// Normalizes raw identifier text to its canonical, comparable form.
///
/// The transformation lowercases the text, trims surrounding whitespace and
/// collapses every internal whitespace run into a single underscore. It is
/// total, pure and idempotent. No locale-specific folding is applied.
///
/// # Examples
///
/// ```
/// use platon::canonicalize;
///
/// assert_eq!(canonicalize("ABC 123"), "abc_123");
/// assert_eq!(canonicalize("abc_123"), "abc_123");
/// assert_eq!(canonicalize(&canonicalize(" MSCU\t4401 ")), "mscu_4401");
/// ```
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(canonicalize("ABC 123"), "abc_123");
        assert_eq!(canonicalize("abc_123"), "abc_123");
        assert_eq!(canonicalize("ABC 123"), canonicalize("abc_123"));
    }

    #[test]
    fn test_trims_and_collapses_runs() {
        assert_eq!(canonicalize("  Abc \t\n 123  "), "abc_123");
        assert_eq!(canonicalize("a b  c"), "a_b_c");
    }

    #[test]
    fn test_idempotent() {
        for raw in ["ABC 123", "  x  y ", "", "already_canonical", "MiXeD\tCase 9"] {
            let once = canonicalize(raw);
            assert_eq!(canonicalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("   \t "), "");
    }

    #[test]
    fn test_non_ascii_lowercased_without_folding() {
        assert_eq!(canonicalize("ÄBC Ü"), "äbc_ü");
    }
}

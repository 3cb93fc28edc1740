//! Glob Pattern Compiler
//!
//! Compiles the `*` / `?` wildcard syntax accepted by `delete_pattern` into
//! an anchored matcher used to enumerate the local tier. The same pattern
//! string is handed to the shared tier's `SCAN MATCH`, so the syntax is kept
//! to the subset both sides agree on:
//!
//! - `*` matches any run of characters, including an empty one
//! - `?` matches exactly one character
//! - `\x` matches `x` literally (so `\*` is a literal asterisk)
//!
//! Matching is anchored at both ends: `sprint:1*` does not match
//! `xsprint:1`.

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

/// A compiled glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compile a pattern. Fails only on a dangling trailing backslash.
    pub fn compile(pattern: &str) -> Result<Self> {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    // Collapse runs of `*`
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                }
                '?' => tokens.push(Token::AnyOne),
                '\\' => match chars.next() {
                    Some(escaped) => tokens.push(Token::Literal(escaped)),
                    None => {
                        return Err(CacheError::InvalidPattern {
                            pattern: pattern.to_string(),
                            reason: "trailing escape character".to_string(),
                        })
                    }
                },
                other => tokens.push(Token::Literal(other)),
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// Original pattern text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render for a server-side `SCAN MATCH`. Redis reads `[...]` as a
    /// character class, so every literal metacharacter is escaped.
    pub fn to_scan_pattern(&self) -> String {
        let mut out = String::with_capacity(self.source.len());
        for token in &self.tokens {
            match token {
                Token::AnyRun => out.push('*'),
                Token::AnyOne => out.push('?'),
                Token::Literal(c) => {
                    if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                        out.push('\\');
                    }
                    out.push(*c);
                }
            }
        }
        out
    }

    /// True if the pattern contains no wildcards
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// Test `key` against the pattern.
    ///
    /// Iterative matcher with single-star backtracking: linear in the common
    /// case and never exponential.
    pub fn matches(&self, key: &str) -> bool {
        let text: Vec<char> = key.chars().collect();
        let tokens = &self.tokens;

        let (mut t, mut k) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;

        while k < text.len() {
            match tokens.get(t) {
                Some(Token::Literal(c)) if *c == text[k] => {
                    t += 1;
                    k += 1;
                }
                Some(Token::AnyOne) => {
                    t += 1;
                    k += 1;
                }
                Some(Token::AnyRun) => {
                    star = Some((t, k));
                    t += 1;
                }
                _ => match star {
                    Some((star_t, star_k)) => {
                        t = star_t + 1;
                        k = star_k + 1;
                        star = Some((star_t, star_k + 1));
                    }
                    None => return false,
                },
            }
        }

        tokens[t..].iter().all(|tok| *tok == Token::AnyRun)
    }
}

impl std::fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Escape glob metacharacters so `literal` matches only itself.
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '\\' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn glob(p: &str) -> GlobPattern {
        GlobPattern::compile(p).unwrap()
    }

    #[test]
    fn test_empty_pattern_matches_only_empty_key() {
        let g = glob("");
        assert!(g.matches(""));
        assert!(!g.matches("a"));
        assert!(g.is_literal());
    }

    #[test]
    fn test_literal_pattern_is_exact() {
        let g = glob("sprint_state:123");
        assert!(g.is_literal());
        assert!(g.matches("sprint_state:123"));
        assert!(!g.matches("sprint_state:1234"));
        assert!(!g.matches("xsprint_state:123"));
    }

    #[test]
    fn test_trailing_wildcard() {
        let g = glob("sprint:123:*");
        assert!(g.matches("sprint:123:"));
        assert!(g.matches("sprint:123:issues:all:100"));
        assert!(!g.matches("sprint:1234:issues"));
        assert!(!g.matches("sprint:123"));
    }

    #[test]
    fn test_single_character_wildcard() {
        let g = glob("sprint:?:metrics");
        assert!(g.matches("sprint:7:metrics"));
        assert!(!g.matches("sprint:77:metrics"));
        assert!(!g.matches("sprint::metrics"));
    }

    #[test]
    fn test_inner_wildcards_backtrack() {
        let g = glob("comprehensive:*:owner:*:true");
        assert!(g.matches("comprehensive:9:owner:repo:true"));
        assert!(g.matches("comprehensive:9:owner:a:owner:b:true"));
        assert!(!g.matches("comprehensive:9:owner:repo:false"));
    }

    #[test]
    fn test_consecutive_stars_collapse() {
        let g = glob("a**b");
        assert!(g.matches("ab"));
        assert!(g.matches("a:x:b"));
        assert!(!g.matches("a:x:c"));
        assert!(glob("a***").matches("a"));
    }

    #[test]
    fn test_escaped_metacharacters() {
        let g = glob(r"key\*:*");
        assert!(g.matches("key*:1"));
        assert!(!g.matches("keyX:1"));

        let g = glob(r"a\?b");
        assert!(g.matches("a?b"));
        assert!(!g.matches("axb"));
    }

    #[test]
    fn test_escaped_delimiter_is_literal() {
        let g = glob(r"sprint\:1:*");
        assert!(g.matches("sprint:1:issues"));
        assert!(!g.matches("sprint;1:issues"));
    }

    #[test]
    fn test_trailing_backslash_rejected() {
        assert!(matches!(
            GlobPattern::compile("sprint:\\"),
            Err(CacheError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_unicode_keys() {
        let g = glob("team:?:name");
        assert!(g.matches("team:é:name"));
    }

    #[test]
    fn test_escape_roundtrip() {
        let literal = "weird*key?[1]";
        let g = glob(&escape(literal));
        assert!(g.is_literal());
        assert!(g.matches(literal));
        assert!(!g.matches("weirdXkey?[1]"));
    }

    #[test]
    fn test_scan_pattern_escapes_brackets() {
        assert_eq!(glob("sprint:1:*").to_scan_pattern(), "sprint:1:*");
        assert_eq!(glob("a[b]?").to_scan_pattern(), "a\\[b\\]?");
        assert_eq!(glob("x\\*y").to_scan_pattern(), "x\\*y");
    }

    proptest! {
        #[test]
        fn prop_escaped_literal_matches_itself(s in "[a-z0-9:*?_-]{0,24}") {
            let g = GlobPattern::compile(&escape(&s)).unwrap();
            prop_assert!(g.matches(&s));
        }

        #[test]
        fn prop_prefix_star_matches_any_suffix(prefix in "[a-z0-9:]{0,12}", suffix in "[a-z0-9:]{0,12}") {
            let g = GlobPattern::compile(&format!("{}*", escape(&prefix))).unwrap();
            let key = format!("{prefix}{suffix}");
            prop_assert!(g.matches(&key));
        }
    }
}

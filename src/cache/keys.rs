//! Cache Key Builders
//!
//! Deterministic, colon-delimited hierarchical keys. Variable segments are
//! sanitized so an id containing `:` or a glob metacharacter can never
//! collide with, or be swept up by, another entity's pattern.

use crate::domain::ReportParams;

/// Segment delimiter
pub const DELIMITER: char = ':';

/// Suffix for refresh metadata records
pub const META_SUFFIX: &str = "meta";

/// Prefix reserved for health-check probe keys
pub const HEALTH_PREFIX: &str = "__health__";

/// Replace delimiter, glob metacharacters and whitespace with `_`.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '[' | ']' | '\\' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Join already-sanitized segments
fn join(segments: &[&str]) -> String {
    segments.join(":")
}

/// `{entity}:{id}:{facet}`
pub fn entity_key(entity: &str, id: &str, facet: &str) -> String {
    let (entity, id, facet) = (
        sanitize_segment(entity),
        sanitize_segment(id),
        sanitize_segment(facet),
    );
    join(&[entity.as_str(), id.as_str(), facet.as_str()])
}

/// `aggregate:{id}:{signature}` where the signature is built from `params`
pub fn aggregate_key(id: &str, params: &[&str]) -> String {
    format!(
        "aggregate:{}:{}",
        sanitize_segment(id),
        param_signature(params)
    )
}

/// Sanitized, colon-joined parameter list
pub fn param_signature(params: &[&str]) -> String {
    params
        .iter()
        .map(|p| sanitize_segment(p))
        .collect::<Vec<_>>()
        .join(":")
}

/// `{key}:meta`
pub fn meta_key(key: &str) -> String {
    format!("{key}:{META_SUFFIX}")
}

// =============================================================================
// Sprint domain keys
// =============================================================================

/// `sprint:{id}:issues:{status}:{max_results}`
pub fn sprint_issues_key(sprint_id: &str, status: &str, max_results: u32) -> String {
    format!(
        "sprint:{}:issues:{}:{}",
        sanitize_segment(sprint_id),
        sanitize_segment(status),
        max_results
    )
}

/// `sprint:{id}:metrics:{facet}`
pub fn sprint_metrics_key(sprint_id: &str, facet: &str) -> String {
    format!(
        "sprint:{}:metrics:{}",
        sanitize_segment(sprint_id),
        sanitize_segment(facet)
    )
}

/// `comprehensive:{id}:{owner}:{repo}:{flags...}`
pub fn comprehensive_report_key(sprint_id: &str, params: &ReportParams) -> String {
    let flags = params.flags().map(|f| f.to_string());
    let mut parts: Vec<&str> = vec![params.owner.as_str(), params.repo.as_str()];
    parts.extend(flags.iter().map(String::as_str));
    format!(
        "comprehensive:{}:{}",
        sanitize_segment(sprint_id),
        param_signature(&parts)
    )
}

/// `sprint_state:{id}`
pub fn sprint_state_key(sprint_id: &str) -> String {
    format!("sprint_state:{}", sanitize_segment(sprint_id))
}

/// The four patterns covering everything cached for one sprint
pub fn sprint_invalidation_patterns(sprint_id: &str) -> [String; 4] {
    let id = sanitize_segment(sprint_id);
    [
        format!("sprint:{id}:issues:*"),
        format!("sprint:{id}:metrics:*"),
        format!("comprehensive:{id}:*"),
        format!("sprint_state:{id}"),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::glob::GlobPattern;
    use proptest::prelude::*;

    #[test]
    fn test_entity_key_layout() {
        assert_eq!(entity_key("sprint", "42", "velocity"), "sprint:42:velocity");
    }

    #[test]
    fn test_sanitize_strips_delimiters() {
        assert_eq!(sanitize_segment("a:b*c?d"), "a_b_c_d");
        assert_eq!(sanitize_segment("my repo"), "my_repo");
        assert_eq!(sanitize_segment("plain-id_1"), "plain-id_1");
    }

    #[test]
    fn test_sanitized_id_cannot_escape_its_scope() {
        // An id of "1:*" must not produce a key that matches sprint 1's pattern.
        let key = sprint_issues_key("1:*", "all", 100);
        assert_eq!(key, "sprint:1__:issues:all:100");
        let pattern = GlobPattern::compile(&sprint_invalidation_patterns("1")[0]).unwrap();
        assert!(!pattern.matches(&key));
    }

    #[test]
    fn test_aggregate_key() {
        assert_eq!(
            aggregate_key("7", &["owner", "repo:x"]),
            "aggregate:7:owner:repo_x"
        );
    }

    #[test]
    fn test_comprehensive_key_matches_expected_layout() {
        let params = ReportParams::new("o", "r");
        assert_eq!(
            comprehensive_report_key("300", &params),
            "comprehensive:300:o:r:true:true:true:true:true"
        );
    }

    #[test]
    fn test_sprint_keys() {
        assert_eq!(sprint_issues_key("300", "all", 100), "sprint:300:issues:all:100");
        assert_eq!(sprint_metrics_key("300", "burndown"), "sprint:300:metrics:burndown");
        assert_eq!(sprint_state_key("300"), "sprint_state:300");
        assert_eq!(meta_key("sprint:300:issues:all:100"), "sprint:300:issues:all:100:meta");
    }

    #[test]
    fn test_invalidation_patterns_cover_sprint_keys() {
        let params = ReportParams::new("o", "r");
        let keys = [
            sprint_issues_key("5", "all", 100),
            sprint_metrics_key("5", "velocity"),
            comprehensive_report_key("5", &params),
            sprint_state_key("5"),
        ];
        let patterns: Vec<GlobPattern> = sprint_invalidation_patterns("5")
            .iter()
            .map(|p| GlobPattern::compile(p).unwrap())
            .collect();

        for (key, pattern) in keys.iter().zip(patterns.iter()) {
            assert!(pattern.matches(key), "{pattern} should match {key}");
        }
        // Nothing for sprint 50 is swept up by sprint 5's patterns
        assert!(!patterns[0].matches(&sprint_issues_key("50", "all", 100)));
        assert!(!patterns[3].matches(&sprint_state_key("50")));
    }

    proptest! {
        #[test]
        fn prop_sanitized_segment_has_no_delimiters(s in ".{0,32}") {
            let out = sanitize_segment(&s);
            prop_assert!(!out.contains(':'));
            prop_assert!(!out.contains('*'));
            prop_assert!(!out.contains('?'));
        }
    }
}

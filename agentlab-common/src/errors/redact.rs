//! Secret redaction applied at the outermost error boundary.

/// Replacement text for redacted secrets.
pub const REDACTED: &str = "[redacted]";

/// Replace every occurrence of each non-empty secret in `text`.
///
/// Longer secrets are replaced first so a secret that contains another one
/// is never left half-visible.
pub fn sanitize(text: &str, secrets: &[&str]) -> String {
    let mut ordered: Vec<&str> = secrets
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));
    ordered.dedup();

    let mut out = text.to_string();
    for secret in ordered {
        if out.contains(secret) {
            out = out.replace(secret, REDACTED);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_replaces_all_occurrences() {
        assert_eq!(
            sanitize("Bearer abc123 and again abc123", &["abc123"]),
            "Bearer [redacted] and again [redacted]"
        );
    }

    #[test]
    fn test_sanitize_ignores_empty_secrets() {
        assert_eq!(sanitize("nothing to hide", &["", "  "]), "nothing to hide");
    }

    #[test]
    fn test_sanitize_overlapping_secrets() {
        assert_eq!(sanitize("tok-long", &["tok", "tok-long"]), "[redacted]");
    }

    proptest! {
        #[test]
        fn prop_secret_never_survives(prefix in ".{0,20}", secret in "[A-Z0-9]{6,32}", suffix in ".{0,20}") {
            let text = format!("{prefix}{secret}{suffix}");
            let out = sanitize(&text, &[&secret]);
            prop_assert!(!out.contains(&secret));
        }
    }
}

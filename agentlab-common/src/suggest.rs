//! "Did you mean" ranking for commands, profiles and VMIDs.

/// Optimal-string-alignment distance (Damerau-Levenshtein with adjacent
/// transpositions, no substring edited twice).
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut d = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in d.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        d[0][j] = j;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (d[i - 1][j] + 1)
                .min(d[i][j - 1] + 1)
                .min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(d[i - 2][j - 2] + 1);
            }
            d[i][j] = best;
        }
    }
    d[n][m]
}

/// Score in `[0, 1]`-ish; lower is closer. Prefix matches get a bonus.
fn score(input: &str, candidate: &str) -> f64 {
    let input = input.to_lowercase();
    let candidate = candidate.to_lowercase();
    let longest = input.chars().count().max(candidate.chars().count()).max(1);
    let mut s = edit_distance(&input, &candidate) as f64 / longest as f64;
    if !input.is_empty() && (candidate.starts_with(&input) || input.starts_with(&candidate)) {
        s -= 0.5;
    }
    s
}

/// Upper bound on a score for a candidate to be worth suggesting.
const SUGGESTION_THRESHOLD: f64 = 0.5;

/// Rank `candidates` by similarity to `input`, best first, at most `limit`.
///
/// Comparison is case-insensitive; ties break alphabetically so output is
/// deterministic. Exact (case-insensitive) matches are excluded since
/// suggesting the input back is useless.
pub fn rank_suggestions<S: AsRef<str>>(input: &str, candidates: &[S], limit: usize) -> Vec<String> {
    let input = input.trim();
    if input.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(f64, &str)> = candidates
        .iter()
        .map(AsRef::as_ref)
        .filter(|c| !c.eq_ignore_ascii_case(input))
        .map(|c| (score(input, c), c))
        .filter(|(s, _)| *s <= SUGGESTION_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, c)| c.to_string())
        .collect()
}

/// The `limit` VMIDs numerically closest to `target`, closest first.
pub fn closest_vmids(target: u32, vmids: &[u32], limit: usize) -> Vec<u32> {
    let mut sorted: Vec<u32> = vmids.iter().copied().filter(|v| *v != target).collect();
    sorted.sort_by_key(|v| (v.abs_diff(target), *v));
    sorted.dedup();
    sorted.truncate(limit);
    sorted
}

/// Format suggestions as `Did you mean: a, b?`, or `None` when empty.
pub fn did_you_mean(suggestions: &[String]) -> Option<String> {
    if suggestions.is_empty() {
        None
    } else {
        Some(format!("Did you mean: {}?", suggestions.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_distance_transposition() {
        assert_eq!(edit_distance("sandbox", "sadnbox"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_rank_commands() {
        let commands = [
            "job", "sandbox", "workspace", "session", "profile", "msg", "logs", "ssh", "status",
            "connect", "disconnect", "init", "bootstrap",
        ];
        assert_eq!(rank_suggestions("sandbx", &commands, 3), vec!["sandbox"]);
        assert_eq!(rank_suggestions("stat", &commands, 3), vec!["status"]);
        assert_eq!(rank_suggestions("SSH", &commands, 3), Vec::<String>::new());
        assert!(rank_suggestions("zzzzzzzz", &commands, 3).is_empty());
    }

    #[test]
    fn test_rank_prefers_prefix() {
        let profiles = ["yolo", "yolo-large", "secure-small"];
        let ranked = rank_suggestions("yol", &profiles, 2);
        assert_eq!(ranked[0], "yolo");
    }

    #[test]
    fn test_closest_vmids() {
        assert_eq!(closest_vmids(9010, &[9001, 9011, 9020, 8000], 2), vec![9011, 9001]);
        assert_eq!(closest_vmids(5, &[4, 6], 2), vec![4, 6]);
        assert!(closest_vmids(1, &[], 3).is_empty());
    }

    #[test]
    fn test_did_you_mean() {
        assert_eq!(
            did_you_mean(&["job".to_string(), "logs".to_string()]).as_deref(),
            Some("Did you mean: job, logs?")
        );
        assert_eq!(did_you_mean(&[]), None);
    }
}

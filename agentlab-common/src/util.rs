//! Shared utilities for agentlab.

/// Cap on subprocess output quoted inside error messages.
pub const SUBPROCESS_OUTPUT_LIMIT: usize = 2048;

/// Lowercase slug: runs of `[a-z0-9]` joined with single `-`.
///
/// Idempotent; the result is either empty or matches
/// `^[a-z0-9]+(-[a-z0-9]+)*$`.
pub fn slugify_workspace_name(value: &str) -> String {
    let lowered = value.to_lowercase();
    let runs: Vec<&str> = lowered
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|run| !run.is_empty())
        .collect();
    runs.join("-")
}

/// Session name used for branch-scoped stateful runs.
pub fn branch_session_name(branch: &str) -> Option<String> {
    let slug = slugify_workspace_name(branch);
    if slug.is_empty() {
        None
    } else {
        Some(format!("branch-{slug}"))
    }
}

/// Default workspace name for a repository URL: slug of its basename.
pub fn repo_workspace_name(repo_url: &str) -> Option<String> {
    let trimmed = repo_url.trim().trim_end_matches('/');
    let base = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");
    let slug = slugify_workspace_name(base);
    if slug.is_empty() { None } else { Some(slug) }
}

/// Parse a workspace size of the form `<N>`, `<N>G` or `<N>GB`.
pub fn parse_size_gb(raw: &str) -> Result<u32, String> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let digits = upper
        .strip_suffix("GB")
        .or_else(|| upper.strip_suffix('G'))
        .unwrap_or(&upper);
    match digits.parse::<u32>() {
        Ok(0) => Err(format!("workspace size must be greater than zero, got {trimmed:?}")),
        Ok(n) => Ok(n),
        Err(_) => Err(format!(
            "invalid workspace size {trimmed:?}: expected <N>G or <N>GB"
        )),
    }
}

/// Truncate `text` to at most `limit` bytes on a char boundary, adding an
/// ellipsis when anything was cut.
pub fn truncate_output(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= limit {
        return trimmed.to_string();
    }
    let mut end = limit;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

fn find_value_end(s: &str) -> usize {
    let mut end = 0;
    let mut in_quote = None;
    let mut escaped = false;

    for c in s.chars() {
        let char_len = c.len_utf8();

        if escaped {
            escaped = false;
            end += char_len;
            continue;
        }
        if c == '\\' {
            escaped = true;
            end += char_len;
            continue;
        }
        if let Some(q) = in_quote {
            if c == q {
                in_quote = None;
            }
            end += char_len;
            continue;
        }
        if c == '"' || c == '\'' {
            in_quote = Some(c);
            end += char_len;
            continue;
        }
        if c.is_whitespace() {
            break;
        }
        end += char_len;
    }
    end
}

/// Mask secret-bearing flags and variables in a command line before it is
/// logged.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let patterns = [
        ("--control-token ", "--control-token ***"),
        ("--control-token=", "--control-token=***"),
        ("--tailscale-authkey ", "--tailscale-authkey ***"),
        ("--tailscale-authkey=", "--tailscale-authkey=***"),
        ("--authkey ", "--authkey ***"),
        ("--authkey=", "--authkey=***"),
        ("--token ", "--token ***"),
        ("--token=", "--token=***"),
        ("AGENTLAB_TOKEN=", "AGENTLAB_TOKEN=***"),
        ("TS_AUTHKEY=", "TS_AUTHKEY=***"),
    ];

    let mut result = cmd.to_string();
    for (pattern, replacement) in patterns {
        let mut search_start = 0;
        while search_start < result.len() {
            let Some(start) = result[search_start..].find(pattern) else {
                break;
            };
            let abs_start = search_start + start;
            // "--token " also matches inside "--control-token "; the longer
            // pattern already masked that value.
            if result[abs_start + pattern.len()..].starts_with("***") {
                search_start = abs_start + pattern.len();
                continue;
            }
            let value_start = abs_start + pattern.len();
            let value_end = value_start + find_value_end(&result[value_start..]);

            result = format!("{}{}{}", &result[..abs_start], replacement, &result[value_end..]);
            search_start = abs_start + replacement.len();
        }
    }
    result
}

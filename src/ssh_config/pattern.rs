//! OpenSSH host pattern matching (`*`, `?` and `!` negation).

/// True when `token` is a pattern rather than a literal host name
pub fn is_pattern(token: &str) -> bool {
    let trimmed = token.trim();
    trimmed.is_empty()
        || trimmed.starts_with('!')
        || trimmed.contains('*')
        || trimmed.contains('?')
}

/// Match `host` against a `Host` pattern list. A matching negated pattern
/// rejects the host regardless of any positive match.
pub fn host_matches(host: &str, patterns: &[String]) -> bool {
    let mut matched = false;

    for raw in patterns {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }

        let (negated, pattern) = entry
            .strip_prefix('!')
            .map(|p| (true, p))
            .unwrap_or((false, entry));

        if glob_match(&pattern.to_ascii_lowercase(), &host.to_ascii_lowercase()) {
            if negated {
                return false;
            }
            matched = true;
        }
    }

    matched
}

/// Glob match supporting `*` (any run) and `?` (any single byte)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let (mut p_idx, mut t_idx) = (0usize, 0usize);
    let mut star_idx = None;
    let mut match_idx = 0usize;
    let p_bytes = pattern.as_bytes();
    let t_bytes = text.as_bytes();

    while t_idx < t_bytes.len() {
        if p_idx < p_bytes.len() && (p_bytes[p_idx] == b'?' || p_bytes[p_idx] == t_bytes[t_idx]) {
            p_idx += 1;
            t_idx += 1;
            continue;
        }

        if p_idx < p_bytes.len() && p_bytes[p_idx] == b'*' {
            star_idx = Some(p_idx);
            match_idx = t_idx;
            p_idx += 1;
            continue;
        }

        if let Some(star_pos) = star_idx {
            p_idx = star_pos + 1;
            match_idx += 1;
            t_idx = match_idx;
            continue;
        }

        return false;
    }

    while p_idx < p_bytes.len() && p_bytes[p_idx] == b'*' {
        p_idx += 1;
    }

    p_idx == p_bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pats(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn literal_names_are_not_patterns() {
        assert!(!is_pattern("prod"));
        assert!(!is_pattern("nick name"));
        assert!(is_pattern("*"));
        assert!(is_pattern("web?"));
        assert!(is_pattern("!bastion"));
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("web*", "web01"));
        assert!(glob_match("db-?", "db-1"));
        assert!(!glob_match("db-?", "db-10"));
        assert!(glob_match("*.example.com", "a.example.com"));
        assert!(!glob_match("*.example.com", "example.org"));
    }

    #[test]
    fn negation_wins() {
        let patterns = pats(&["*", "!bastion"]);
        assert!(host_matches("web", &patterns));
        assert!(!host_matches("bastion", &patterns));
    }

    #[test]
    fn only_negations_never_match() {
        assert!(!host_matches("web", &pats(&["!bastion"])));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(host_matches("WEB01", &pats(&["web*"])));
    }
}

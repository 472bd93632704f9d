//! Rendering records as `Host` blocks and splicing them into config text.
//!
//! Edits touch only the lines of the block being changed. Every other line,
//! including comments, blank separators and `Match` blocks, is carried over
//! byte-for-byte.

use std::fmt::Write as _;

use super::parser::{BlockSpan, DISABLED_RULE_MARKER, block_spans};
use crate::connection::{AuthMethod, ConnectionRecord, DEFAULT_PORT, KeySelectMode};

const INDENT: &str = "    ";

/// Quote a token containing whitespace; an empty token becomes `""`
pub fn quote_token(token: &str) -> String {
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        format!("\"{}\"", token)
    } else {
        token.to_string()
    }
}

/// Render `record` as a complete `Host` block ending in a newline
pub fn format_host_block(record: &ConnectionRecord) -> String {
    let mut out = String::new();

    let mut header = vec![quote_token(&record.nickname)];
    header.extend(record.aliases.iter().map(|a| quote_token(a)));
    let _ = writeln!(out, "Host {}", header.join(" "));

    let mut emit = |key: &str, value: &str| {
        if value.is_empty() {
            let _ = writeln!(out, "{}{}", INDENT, key);
        } else {
            let _ = writeln!(out, "{}{} {}", INDENT, key, value);
        }
    };

    if !record.hostname.is_empty() {
        emit("HostName", &quote_token(&record.hostname));
    }
    if let Some(user) = &record.username {
        emit("User", &quote_token(user));
    }
    if record.port != DEFAULT_PORT {
        emit("Port", &record.port.to_string());
    }
    if let Some(identity) = &record.identity_file {
        emit("IdentityFile", &quote_token(identity));
    }
    if record.key_select_mode == KeySelectMode::Specific {
        emit("IdentitiesOnly", "yes");
    }
    if let Some(certificate) = &record.certificate {
        emit("CertificateFile", &quote_token(certificate));
    }
    if record.auth_method == AuthMethod::Password {
        emit("PreferredAuthentications", "password");
    }
    if !record.proxy_jump.is_empty() {
        emit("ProxyJump", &record.proxy_jump.join(","));
    }
    if let Some(command) = &record.proxy_command {
        emit("ProxyCommand", command);
    }
    if record.x11_forwarding {
        emit("ForwardX11", "yes");
    }

    for rule in &record.forwarding_rules {
        let line = format!("{} {}", rule.directive_name(), rule.directive_value());
        if rule.enabled {
            emit(&line, "");
        } else {
            emit(&format!("{}{}", DISABLED_RULE_MARKER, line), "");
        }
    }

    let has_extra = |key: &str| record.extra_directives.iter().any(|(k, _)| k.eq_ignore_ascii_case(key));

    if let Some(command) = &record.local_command {
        emit("LocalCommand", command);
        if !has_extra("PermitLocalCommand") {
            emit("PermitLocalCommand", "yes");
        }
    }
    if let Some(command) = &record.remote_command {
        emit("RemoteCommand", command);
        if !has_extra("RequestTTY") {
            emit("RequestTTY", "yes");
        }
    }

    for (key, value) in &record.extra_directives {
        emit(key, value);
    }

    out
}

/// Blocks are keyed by their first pattern; a name listed later on a `Host`
/// line is an alias of that block and never selects it.
fn find_span<'a>(spans: &'a [BlockSpan], nickname: &str) -> Option<&'a BlockSpan> {
    spans.iter().find(|span| {
        span.patterns
            .as_ref()
            .and_then(|patterns| patterns.first())
            .is_some_and(|first| first == nickname)
    })
}

/// Replace the first block naming `nickname` with `record`'s rendering.
///
/// Returns the new text and whether a block was found. When none matches the
/// record is appended instead.
pub fn replace_host_block(content: &str, nickname: &str, record: &ConnectionRecord) -> (String, bool) {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let spans = block_spans(&lines);

    let Some(span) = find_span(&spans, nickname) else {
        tracing::debug!("No Host block for '{}', appending", nickname);
        return (append_host_block(content, record), false);
    };

    let mut out = String::with_capacity(content.len());
    out.extend(lines[..span.lines.start].iter().copied());
    out.push_str(&format_host_block(record));
    out.extend(lines[span.body_end..].iter().copied());
    (out, true)
}

/// Append `record` after the existing content, separated by a blank line
pub fn append_host_block(content: &str, record: &ConnectionRecord) -> String {
    let mut out = content.to_string();
    if !out.is_empty() {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        if !out.ends_with("\n\n") {
            out.push('\n');
        }
    }
    out.push_str(&format_host_block(record));
    out
}

/// Remove the first block naming `nickname` together with the blank lines
/// that follow it. Returns `None` when no block matches.
pub fn remove_host_block(content: &str, nickname: &str) -> Option<String> {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let spans = block_spans(&lines);
    let span = find_span(&spans, nickname)?;

    let mut end = span.body_end;
    while end < lines.len() && lines[end].trim().is_empty() {
        end += 1;
    }

    let mut out = String::with_capacity(content.len());
    out.extend(lines[..span.lines.start].iter().copied());
    out.extend(lines[end..].iter().copied());
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ForwardingRule;
    use crate::ssh_config::builder::build_record;
    use crate::ssh_config::parser::SshConfig;

    fn records(content: &str) -> Vec<ConnectionRecord> {
        SshConfig::parse(content)
            .host_blocks()
            .filter_map(|b| build_record(b).ok().flatten())
            .collect()
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_token("plain"), "plain");
        assert_eq!(quote_token("has space"), "\"has space\"");
        assert_eq!(quote_token(""), "\"\"");
    }

    #[test]
    fn minimal_record_renders_only_host_line() {
        let record = ConnectionRecord::new("solo");
        assert_eq!(format_host_block(&record), "Host solo\n");
    }

    #[test]
    fn quoted_identity_file_and_nickname() {
        let mut record = ConnectionRecord::new("my box");
        record.hostname = "h".to_string();
        record.identity_file = Some("~/my keys/id".to_string());
        let text = format_host_block(&record);
        assert!(text.starts_with("Host \"my box\"\n"));
        assert!(text.contains("    IdentityFile \"~/my keys/id\"\n"));

        let parsed = records(&text);
        assert_eq!(parsed[0].nickname, "my box");
        assert_eq!(parsed[0].identity_file.as_deref(), Some("~/my keys/id"));
    }

    #[test]
    fn full_record_round_trips() {
        let mut record = ConnectionRecord::new("full");
        record.aliases = vec!["f".to_string()];
        record.hostname = "10.1.2.3".to_string();
        record.username = Some("deploy".to_string());
        record.port = 2200;
        record.identity_file = Some("~/.ssh/id_ed25519".to_string());
        record.certificate = Some("~/.ssh/id_ed25519-cert.pub".to_string());
        record.key_select_mode = KeySelectMode::Specific;
        record.auth_method = AuthMethod::Password;
        record.proxy_jump = vec!["bastion".to_string(), "jump2".to_string()];
        record.x11_forwarding = true;
        record.local_command = Some("notify-send up".to_string());
        record.remote_command = Some("tmux new -A -s main".to_string());
        record.add_forwarding_rule(ForwardingRule::local("localhost", 8080, "web", 80).unwrap());
        record.add_forwarding_rule(
            ForwardingRule::remote("0.0.0.0", 9000, "localhost", 3000)
                .unwrap()
                .with_enabled(false),
        );
        record.add_forwarding_rule(ForwardingRule::dynamic("localhost", 1080).unwrap());
        record.extra_directives = vec![
            ("ServerAliveInterval".to_string(), "30".to_string()),
            ("Compression".to_string(), "yes".to_string()),
        ];

        let parsed = records(&format_host_block(&record));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0], record);
    }

    #[test]
    fn request_tty_not_duplicated() {
        let mut record = ConnectionRecord::new("a");
        record.remote_command = Some("htop".to_string());
        record.extra_directives = vec![("RequestTTY".to_string(), "force".to_string())];
        let text = format_host_block(&record);
        assert_eq!(text.matches("RequestTTY").count(), 1);
        assert_eq!(records(&text)[0], record);
    }

    #[test]
    fn replace_leaves_neighbours_untouched() {
        let content = "# managed by hand\nHost A\n  HostName a.example\n  # keep me\n\n# about B\nHost B\n  HostName b.example\n\nHost C\n\tHostName   c.example\n";
        let mut changed = records(content).remove(1);
        changed.hostname = "b2.example".to_string();

        let (out, found) = replace_host_block(content, "B", &changed);
        assert!(found);
        assert_eq!(
            out,
            "# managed by hand\nHost A\n  HostName a.example\n  # keep me\n\n# about B\nHost B\n    HostName b2.example\n\nHost C\n\tHostName   c.example\n"
        );
    }

    #[test]
    fn replace_with_rename_finds_old_block() {
        let content = "Host old\n  HostName h\n";
        let mut record = records(content).remove(0);
        record.nickname = "new".to_string();
        let (out, found) = replace_host_block(content, "old", &record);
        assert!(found);
        assert_eq!(out, "Host new\n    HostName h\n");
    }

    #[test]
    fn aliases_never_select_a_block() {
        let content = "Host a b\n  HostName ha\n\nHost b\n  HostName hb\n";
        let mut record = records(content).remove(1);
        record.port = 2222;

        let (out, found) = replace_host_block(content, "b", &record);
        assert!(found);
        assert_eq!(out, "Host a b\n  HostName ha\n\nHost b\n    HostName hb\n    Port 2222\n");

        let removed = remove_host_block(content, "b").unwrap();
        assert_eq!(removed, "Host a b\n  HostName ha\n\n");
        assert!(remove_host_block("Host a b\n  HostName ha\n", "b").is_none());
    }

    #[test]
    fn replace_missing_block_appends() {
        let content = "Host a\n  HostName h";
        let record = ConnectionRecord::new("b");
        let (out, found) = replace_host_block(content, "b", &record);
        assert!(!found);
        assert_eq!(out, "Host a\n  HostName h\n\nHost b\n");
    }

    #[test]
    fn replace_preserves_match_blocks() {
        let content = "Match host x\n  User m\n\nHost a\n  User u\n";
        let mut record = records(content).remove(0);
        record.username = Some("v".to_string());
        let (out, _) = replace_host_block(content, "a", &record);
        assert!(out.starts_with("Match host x\n  User m\n\n"));
        assert!(out.ends_with("Host a\n    User v\n"));
    }

    #[test]
    fn append_to_empty_content() {
        let out = append_host_block("", &ConnectionRecord::new("a"));
        assert_eq!(out, "Host a\n");
    }

    #[test]
    fn remove_block_and_following_blank_lines() {
        let content = "Host a\n  User x\n\n\n# about b\nHost b\n  User y\n";
        let out = remove_host_block(content, "a").unwrap();
        assert_eq!(out, "# about b\nHost b\n  User y\n");
        assert!(remove_host_block(content, "zzz").is_none());
    }

    #[test]
    fn remove_last_block() {
        let content = "Host a\n  User x\n\nHost b\n  User y\n";
        let out = remove_host_block(content, "b").unwrap();
        assert_eq!(out, "Host a\n  User x\n\n");
    }
}

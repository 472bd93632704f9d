//! Turns parsed `Host` blocks into [`ConnectionRecord`]s.

use std::collections::HashSet;

use super::parser::{BlockLine, Directive, HostBlock, split_tokens, unquote};
use crate::connection::{
    AuthMethod, ConnectionRecord, DEFAULT_BIND_ADDRESS, ForwardingRule, KeySelectMode,
};
use crate::error::SshConfigError;
use crate::validation::validate_port;

/// Build a record from one block.
///
/// Returns `Ok(None)` for rule blocks (wildcard or negated patterns) and an
/// error for blocks that cannot describe a connection at all. Malformed
/// individual directives are dropped with a warning.
pub fn build_record(block: &HostBlock) -> Result<Option<ConnectionRecord>, SshConfigError> {
    let Some((nickname, aliases)) = block.patterns.split_first() else {
        return Err(SshConfigError::InvalidBlock {
            line: block.line + 1,
            reason: "Host line has no patterns".to_string(),
        });
    };

    if nickname.trim().is_empty() {
        return Err(SshConfigError::InvalidBlock {
            line: block.line + 1,
            reason: "empty host pattern".to_string(),
        });
    }

    if block.is_rule() {
        return Ok(None);
    }

    let mut record = ConnectionRecord::new(nickname.clone());
    record.aliases = aliases.to_vec();

    let has_local_command = block.get("localcommand").is_some();
    let has_remote_command = block.get("remotecommand").is_some();
    let mut seen: HashSet<String> = HashSet::new();

    for line in &block.lines {
        match line {
            BlockLine::Directive(directive) => {
                let key = directive.key.to_ascii_lowercase();
                let first = seen.insert(key.clone());
                apply_directive(
                    &mut record,
                    directive,
                    &key,
                    first,
                    has_local_command,
                    has_remote_command,
                );
            }
            BlockLine::Disabled(directive) => {
                if let Some(rule) = forwarding_rule(&record.nickname, directive) {
                    record.add_forwarding_rule(rule.with_enabled(false));
                }
            }
            BlockLine::Comment(_) => {}
        }
    }

    Ok(Some(record))
}

fn apply_directive(
    record: &mut ConnectionRecord,
    directive: &Directive,
    key: &str,
    first: bool,
    has_local_command: bool,
    has_remote_command: bool,
) {
    let value = directive.value.as_str();

    // Forwarding directives accumulate; extra IdentityFile lines are passed
    // through because ssh tries all of them.
    match key {
        "localforward" | "remoteforward" | "dynamicforward" => {
            if let Some(rule) = forwarding_rule(&record.nickname, directive) {
                record.add_forwarding_rule(rule);
            }
            return;
        }
        "identityfile" if !first => {
            push_extra(record, directive);
            return;
        }
        _ => {}
    }

    let modeled = matches!(
        key,
        "hostname"
            | "user"
            | "port"
            | "identityfile"
            | "certificatefile"
            | "identitiesonly"
            | "proxyjump"
            | "proxycommand"
            | "forwardx11"
            | "localcommand"
            | "remotecommand"
    );
    if modeled && !first {
        tracing::debug!(
            "{}: ignoring repeated {} (first value wins)",
            record.nickname,
            directive.key
        );
        return;
    }

    match key {
        "hostname" => record.hostname = unquote(value).to_string(),
        "user" => record.username = Some(unquote(value).to_string()),
        "port" => match validate_port(value) {
            Ok(port) => record.port = port,
            Err(e) => tracing::warn!(
                "{}: dropping malformed Port '{}' on line {}: {}",
                record.nickname,
                value,
                directive.line + 1,
                e
            ),
        },
        "identityfile" => record.identity_file = Some(unquote(value).to_string()),
        "certificatefile" => record.certificate = Some(unquote(value).to_string()),
        "identitiesonly" => {
            record.key_select_mode = if is_yes(value) {
                KeySelectMode::Specific
            } else {
                KeySelectMode::Automatic
            }
        }
        "proxyjump" if !value.eq_ignore_ascii_case("none") => {
            record.proxy_jump = value
                .split(',')
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .map(str::to_string)
                .collect();
        }
        "proxycommand" => record.proxy_command = Some(value.to_string()),
        "forwardx11" => record.x11_forwarding = is_yes(value),
        "localcommand" => record.local_command = Some(value.to_string()),
        "remotecommand" => record.remote_command = Some(value.to_string()),
        "preferredauthentications"
            if first
                && record.auth_method == AuthMethod::Key
                && value.trim().eq_ignore_ascii_case("password") =>
        {
            record.auth_method = AuthMethod::Password;
        }
        // Companions written alongside LocalCommand / RemoteCommand
        "permitlocalcommand" if first && has_local_command && is_yes(value) => {}
        "requesttty" if first && has_remote_command && value.eq_ignore_ascii_case("yes") => {}
        _ => push_extra(record, directive),
    }
}

fn push_extra(record: &mut ConnectionRecord, directive: &Directive) {
    record
        .extra_directives
        .push((directive.key.clone(), directive.value.clone()));
}

fn is_yes(value: &str) -> bool {
    matches!(
        unquote(value).trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "on" | "1"
    )
}

fn forwarding_rule(nickname: &str, directive: &Directive) -> Option<ForwardingRule> {
    match parse_forward_spec(&directive.key, &directive.value) {
        Ok(rule) => Some(rule),
        Err(reason) => {
            tracing::warn!(
                "{}: dropping {} '{}' on line {}: {}",
                nickname,
                directive.key,
                directive.value,
                directive.line + 1,
                reason
            );
            None
        }
    }
}

/// Parse `[bind_address:]listen_port [target_host:target_port]`
pub fn parse_forward_spec(key: &str, value: &str) -> Result<ForwardingRule, String> {
    let tokens = split_tokens(value);
    let listen = tokens.first().ok_or_else(|| "missing listen port".to_string())?;
    let (listen_address, listen_port) = parse_endpoint(listen, Some(DEFAULT_BIND_ADDRESS))?;

    let key = key.to_ascii_lowercase();
    if key == "dynamicforward" {
        return ForwardingRule::dynamic(listen_address, listen_port).map_err(|e| e.to_string());
    }

    let target = tokens
        .get(1)
        .ok_or_else(|| "missing target host:port".to_string())?;
    let (target_host, target_port) = parse_endpoint(target, None)?;

    let rule = match key.as_str() {
        "localforward" => {
            ForwardingRule::local(listen_address, listen_port, target_host, target_port)
        }
        "remoteforward" => {
            ForwardingRule::remote(listen_address, listen_port, target_host, target_port)
        }
        other => return Err(format!("not a forwarding directive: {}", other)),
    };
    rule.map_err(|e| e.to_string())
}

/// Split `host:port`, `[v6]:port` or a bare port (when `default_host` is set)
fn parse_endpoint(spec: &str, default_host: Option<&str>) -> Result<(String, u32), String> {
    let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated '[' in '{}'", spec))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| format!("missing port in '{}'", spec))?;
        (host.to_string(), port)
    } else if let Some((host, port)) = spec.rsplit_once(':') {
        (host.to_string(), port)
    } else {
        let host = default_host.ok_or_else(|| format!("missing port in '{}'", spec))?;
        (host.to_string(), spec)
    };

    if host.is_empty() && default_host.is_none() {
        return Err(format!("missing host in '{}'", spec));
    }

    let host = if host.is_empty() {
        default_host.unwrap_or_default().to_string()
    } else {
        host
    };

    let port: u32 = port
        .trim()
        .parse()
        .map_err(|_| format!("invalid port '{}'", port))?;
    Ok((host, port))
}

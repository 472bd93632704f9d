//! Resolved `ssh` invocation for a connection record.
//!
//! The profile is what the process-spawning side consumes: every value is
//! resolved (user defaulted, tilde expanded, disabled rules dropped) and
//! [`ConnectionProfile::ssh_args`] yields the argument vector without the
//! `ssh` program name. Nothing here runs a process.

use std::path::PathBuf;

use super::{AuthMethod, ConnectionRecord, DEFAULT_PORT, ForwardKind, ForwardingRule, KeySelectMode};
use crate::config::paths::expand_tilde;
use crate::ssh_config::parser::unquote;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub nickname: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_files: Vec<PathBuf>,
    pub certificate: Option<PathBuf>,
    pub identities_only: bool,
    pub password_auth: bool,
    pub proxy_jump: Vec<String>,
    pub proxy_command: Option<String>,
    pub x11_forwarding: bool,
    /// Enabled rules only
    pub forwards: Vec<ForwardingRule>,
    pub local_command: Option<String>,
    pub remote_command: Option<String>,
    /// Remaining directives as `-o Key=Value` pairs
    pub options: Vec<(String, String)>,
}

impl ConnectionProfile {
    pub fn from_record(record: &ConnectionRecord) -> Self {
        let mut identity_files: Vec<PathBuf> = record
            .identity_file
            .iter()
            .map(|path| expand_tilde(path))
            .collect();
        let mut options = Vec::new();

        for (key, value) in &record.extra_directives {
            if key.eq_ignore_ascii_case("identityfile") {
                identity_files.push(expand_tilde(unquote(value)));
            } else if !value.is_empty() {
                options.push((key.clone(), unquote(value).to_string()));
            }
        }

        Self {
            nickname: record.nickname.clone(),
            host: record.target_host().to_string(),
            port: record.port,
            username: record.effective_username(),
            identity_files,
            certificate: record.certificate.as_deref().map(expand_tilde),
            identities_only: record.key_select_mode == KeySelectMode::Specific,
            password_auth: record.auth_method == AuthMethod::Password,
            proxy_jump: record.proxy_jump.clone(),
            proxy_command: record.proxy_command.clone(),
            x11_forwarding: record.x11_forwarding,
            forwards: record
                .forwarding_rules
                .iter()
                .filter(|r| r.enabled)
                .cloned()
                .collect(),
            local_command: record.local_command.clone(),
            remote_command: record.remote_command.clone(),
            options,
        }
    }

    /// Arguments for `ssh`, ending with the host and optional remote command
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        if self.port != DEFAULT_PORT {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        args.push("-l".to_string());
        args.push(self.username.clone());

        for identity in &self.identity_files {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
        }
        if self.identities_only {
            push_option(&mut args, "IdentitiesOnly=yes".to_string());
        }
        if let Some(certificate) = &self.certificate {
            push_option(&mut args, format!("CertificateFile={}", certificate.display()));
        }
        if self.password_auth {
            push_option(&mut args, "PreferredAuthentications=password".to_string());
        }

        if !self.proxy_jump.is_empty() {
            args.push("-J".to_string());
            args.push(self.proxy_jump.join(","));
        }
        if let Some(command) = &self.proxy_command {
            push_option(&mut args, format!("ProxyCommand={}", command));
        }
        if self.x11_forwarding {
            args.push("-X".to_string());
        }

        for rule in &self.forwards {
            let flag = match rule.kind {
                ForwardKind::Local { .. } => "-L",
                ForwardKind::Remote { .. } => "-R",
                ForwardKind::Dynamic => "-D",
            };
            args.push(flag.to_string());
            args.push(rule.directive_value().replacen(' ', ":", 1));
        }

        if let Some(command) = &self.local_command {
            push_option(&mut args, "PermitLocalCommand=yes".to_string());
            push_option(&mut args, format!("LocalCommand={}", command));
        }

        for (key, value) in &self.options {
            push_option(&mut args, format!("{}={}", key, value));
        }

        if self.remote_command.is_some() {
            args.push("-t".to_string());
        }

        args.push(self.host.clone());

        if let Some(command) = &self.remote_command {
            args.push(command.clone());
        }

        args
    }
}

fn push_option(args: &mut Vec<String>, value: String) {
    args.push("-o".to_string());
    args.push(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ConnectionRecord {
        let mut record = ConnectionRecord::new("prod");
        record.hostname = "10.0.0.1".to_string();
        record.username = Some("alice".to_string());
        record
    }

    #[test]
    fn basic_args() {
        let profile = ConnectionProfile::from_record(&record());
        assert_eq!(profile.ssh_args(), vec!["-l", "alice", "10.0.0.1"]);
    }

    #[test]
    fn nickname_used_as_host_when_hostname_missing() {
        let mut r = ConnectionRecord::new("box");
        r.username = Some("u".to_string());
        assert_eq!(ConnectionProfile::from_record(&r).host, "box");
    }

    #[test]
    fn port_identity_and_proxy() {
        let mut r = record();
        r.port = 2222;
        r.identity_file = Some("/keys/id".to_string());
        r.key_select_mode = KeySelectMode::Specific;
        r.proxy_jump = vec!["bastion".to_string(), "j2".to_string()];
        r.x11_forwarding = true;

        let args = ConnectionProfile::from_record(&r).ssh_args();
        assert_eq!(
            args,
            vec![
                "-p", "2222", "-l", "alice", "-i", "/keys/id", "-o", "IdentitiesOnly=yes", "-J",
                "bastion,j2", "-X", "10.0.0.1"
            ]
        );
    }

    #[test]
    fn only_enabled_forwards_are_passed() {
        let mut r = record();
        r.add_forwarding_rule(ForwardingRule::local("localhost", 8080, "web", 80).unwrap());
        r.add_forwarding_rule(
            ForwardingRule::remote("0.0.0.0", 9000, "localhost", 3000)
                .unwrap()
                .with_enabled(false),
        );
        r.add_forwarding_rule(ForwardingRule::dynamic("localhost", 1080).unwrap());

        let args = ConnectionProfile::from_record(&r).ssh_args();
        assert!(args.windows(2).any(|w| w == ["-L", "localhost:8080:web:80"]));
        assert!(args.windows(2).any(|w| w == ["-D", "localhost:1080"]));
        assert!(!args.iter().any(|a| a == "-R"));
    }

    #[test]
    fn remote_command_requests_tty_and_follows_host() {
        let mut r = record();
        r.remote_command = Some("tmux attach".to_string());
        let args = ConnectionProfile::from_record(&r).ssh_args();
        let n = args.len();
        assert_eq!(&args[n - 3..], ["-t", "10.0.0.1", "tmux attach"]);
    }

    #[test]
    fn extra_directives_become_options() {
        let mut r = record();
        r.extra_directives = vec![
            ("ServerAliveInterval".to_string(), "30".to_string()),
            ("IdentityFile".to_string(), "\"/k 2\"".to_string()),
            ("Compression".to_string(), String::new()),
        ];
        let profile = ConnectionProfile::from_record(&r);
        assert_eq!(profile.identity_files, vec![PathBuf::from("/k 2")]);
        assert_eq!(
            profile.options,
            vec![("ServerAliveInterval".to_string(), "30".to_string())]
        );
        assert!(profile
            .ssh_args()
            .windows(2)
            .any(|w| w == ["-o", "ServerAliveInterval=30"]));
    }
}

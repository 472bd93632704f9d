//! Connection records and their port-forwarding rules.

pub mod manager;
pub mod profile;

pub use manager::{ConfigRule, ConnectionEvent, ConnectionManager};
pub use profile::ConnectionProfile;

use std::path::PathBuf;

use crate::validation::{ValidationError, validate_port_number};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Bind address used when a forwarding spec names only a port
pub const DEFAULT_BIND_ADDRESS: &str = "localhost";

/// How the client picks an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySelectMode {
    /// Offer every key ssh knows about
    #[default]
    Automatic,
    /// Offer only the configured identity file (`IdentitiesOnly yes`)
    Specific,
}

/// Authentication method for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMethod {
    /// Public key authentication
    #[default]
    Key,
    /// Password authentication (`PreferredAuthentications password`)
    Password,
}

/// Direction-specific part of a forwarding rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardKind {
    /// `LocalForward`: listen locally, connect to target from the remote side
    Local { target_host: String, target_port: u16 },
    /// `RemoteForward`: listen remotely, connect to target from this side
    Remote { target_host: String, target_port: u16 },
    /// `DynamicForward`: SOCKS proxy on the listen port
    Dynamic,
}

/// A single port-forwarding rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
    pub kind: ForwardKind,
    pub enabled: bool,
    pub listen_address: String,
    pub listen_port: u16,
}

impl ForwardingRule {
    /// Create a local forward. Ports outside 1-65535 are rejected.
    pub fn local(
        listen_address: impl Into<String>,
        listen_port: u32,
        target_host: impl Into<String>,
        target_port: u32,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            kind: ForwardKind::Local {
                target_host: target_host.into(),
                target_port: validate_port_number(target_port)?,
            },
            enabled: true,
            listen_address: bind_address(listen_address.into()),
            listen_port: validate_port_number(listen_port)?,
        })
    }

    /// Create a remote forward. Ports outside 1-65535 are rejected.
    pub fn remote(
        listen_address: impl Into<String>,
        listen_port: u32,
        target_host: impl Into<String>,
        target_port: u32,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            kind: ForwardKind::Remote {
                target_host: target_host.into(),
                target_port: validate_port_number(target_port)?,
            },
            enabled: true,
            listen_address: bind_address(listen_address.into()),
            listen_port: validate_port_number(listen_port)?,
        })
    }

    /// Create a dynamic (SOCKS) forward
    pub fn dynamic(
        listen_address: impl Into<String>,
        listen_port: u32,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            kind: ForwardKind::Dynamic,
            enabled: true,
            listen_address: bind_address(listen_address.into()),
            listen_port: validate_port_number(listen_port)?,
        })
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// SSH config directive name for this rule
    pub fn directive_name(&self) -> &'static str {
        match self.kind {
            ForwardKind::Local { .. } => "LocalForward",
            ForwardKind::Remote { .. } => "RemoteForward",
            ForwardKind::Dynamic => "DynamicForward",
        }
    }

    /// SSH config directive value, e.g. `localhost:8080 db:5432`
    pub fn directive_value(&self) -> String {
        let listen = self.listen_spec();
        match &self.kind {
            ForwardKind::Local {
                target_host,
                target_port,
            }
            | ForwardKind::Remote {
                target_host,
                target_port,
            } => format!("{} {}", listen, format_endpoint(target_host, *target_port)),
            ForwardKind::Dynamic => listen,
        }
    }

    /// `address:port` of the listening side
    pub fn listen_spec(&self) -> String {
        let address = if self.listen_address.is_empty() {
            DEFAULT_BIND_ADDRESS
        } else {
            &self.listen_address
        };
        format_endpoint(address, self.listen_port)
    }
}

/// An empty bind address means the default one
fn bind_address(address: String) -> String {
    if address.trim().is_empty() {
        DEFAULT_BIND_ADDRESS.to_string()
    } else {
        address
    }
}

/// `host:port`, bracketing IPv6 literals
pub fn format_endpoint(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// A connection as described by one `Host` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// First pattern on the Host line; unique display key
    pub nickname: String,
    /// Remaining patterns on the Host line
    pub aliases: Vec<String>,
    /// `HostName`; empty when the block has none
    pub hostname: String,
    /// `User`; `None` when the block has none
    pub username: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,
    pub certificate: Option<String>,
    pub key_select_mode: KeySelectMode,
    pub auth_method: AuthMethod,
    pub proxy_jump: Vec<String>,
    pub proxy_command: Option<String>,
    pub x11_forwarding: bool,
    pub forwarding_rules: Vec<ForwardingRule>,
    pub local_command: Option<String>,
    pub remote_command: Option<String>,
    /// Unmodeled directives, key case as written, in file order
    pub extra_directives: Vec<(String, String)>,
    /// Config file the block was read from; `None` means the main config
    pub source: Option<PathBuf>,
}

impl ConnectionRecord {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            aliases: Vec::new(),
            hostname: String::new(),
            username: None,
            port: DEFAULT_PORT,
            identity_file: None,
            certificate: None,
            key_select_mode: KeySelectMode::default(),
            auth_method: AuthMethod::default(),
            proxy_jump: Vec::new(),
            proxy_command: None,
            x11_forwarding: false,
            forwarding_rules: Vec::new(),
            local_command: None,
            remote_command: None,
            extra_directives: Vec::new(),
            source: None,
        }
    }

    /// Address ssh will connect to: `HostName`, or the nickname itself
    pub fn target_host(&self) -> &str {
        if self.hostname.is_empty() {
            &self.nickname
        } else {
            &self.hostname
        }
    }

    /// Configured user, falling back to the current OS user
    pub fn effective_username(&self) -> String {
        self.username.clone().unwrap_or_else(current_user)
    }

    /// Case-insensitive nickname comparison
    pub fn has_nickname(&self, nickname: &str) -> bool {
        self.nickname.to_lowercase() == nickname.to_lowercase()
    }

    /// Whether `name` is this record's nickname or one of its aliases,
    /// ignoring case
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        std::iter::once(&self.nickname)
            .chain(&self.aliases)
            .any(|n| n.to_lowercase() == name)
    }

    /// Nickname followed by aliases
    pub fn names(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.nickname).chain(&self.aliases)
    }

    /// Sidebar filter: case-insensitive substring match on the nickname,
    /// aliases or hostname. An empty (or blank) query matches everything.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.names()
            .chain(std::iter::once(&self.hostname))
            .any(|field| field.to_lowercase().contains(&query))
    }

    pub fn add_forwarding_rule(&mut self, rule: ForwardingRule) {
        self.forwarding_rules.push(rule);
    }
}

/// Current OS user name
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

/// Lifecycle of a connection as seen by the UI
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed(_) => "failed",
        }
    }

    /// Whether `next` is a legal successor. There is no automatic retry:
    /// leaving `Failed` requires a fresh connect or an explicit reset.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Unknown | Disconnected | Failed(_), Connecting)
                | (Unknown | Failed(_), Disconnected)
                | (Connecting, Connected | Failed(_))
                | (Connected, Disconnected)
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bind_address_becomes_default() {
        let rule = ForwardingRule::dynamic("", 1080).unwrap();
        assert_eq!(rule.listen_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(rule.directive_value(), "localhost:1080");

        let rule = ForwardingRule::remote(" ", 9000, "app", 80).unwrap();
        assert_eq!(rule.listen_address, DEFAULT_BIND_ADDRESS);
    }

    #[test]
    fn forwarding_port_bounds() {
        assert!(ForwardingRule::local("localhost", 0, "h", 80).is_err());
        assert!(ForwardingRule::local("localhost", 70000, "h", 80).is_err());
        assert!(ForwardingRule::local("localhost", 8080, "h", 0).is_err());
        assert!(ForwardingRule::dynamic("localhost", 1).is_ok());
        assert!(ForwardingRule::dynamic("localhost", 65535).is_ok());
    }

    #[test]
    fn rejected_rule_never_reaches_record() {
        let mut record = ConnectionRecord::new("a");
        for port in [0u32, 1, 65535, 70000] {
            if let Ok(rule) = ForwardingRule::dynamic("localhost", port) {
                record.add_forwarding_rule(rule);
            }
        }
        let ports: Vec<u16> = record.forwarding_rules.iter().map(|r| r.listen_port).collect();
        assert_eq!(ports, vec![1, 65535]);
    }

    #[test]
    fn directive_rendering() {
        let local = ForwardingRule::local("localhost", 8080, "db", 5432).unwrap();
        assert_eq!(local.directive_name(), "LocalForward");
        assert_eq!(local.directive_value(), "localhost:8080 db:5432");

        let remote = ForwardingRule::remote("0.0.0.0", 9000, "::1", 22).unwrap();
        assert_eq!(remote.directive_value(), "0.0.0.0:9000 [::1]:22");

        let dynamic = ForwardingRule::dynamic("", 1080).unwrap();
        assert_eq!(dynamic.directive_value(), "localhost:1080");
    }

    #[test]
    fn query_matches_names_and_host() {
        let mut record = ConnectionRecord::new("Prod-DB");
        record.hostname = "10.0.0.5".to_string();
        record.aliases = vec!["primary.internal".to_string()];

        assert!(record.matches_query(""));
        assert!(record.matches_query("  "));
        assert!(record.matches_query("prod"));
        assert!(record.matches_query("DB"));
        assert!(record.matches_query("10.0.0"));
        assert!(record.matches_query("Primary"));
        assert!(!record.matches_query("staging"));
    }

    #[test]
    fn target_host_falls_back_to_nickname() {
        let mut record = ConnectionRecord::new("prod");
        assert_eq!(record.target_host(), "prod");
        record.hostname = "10.0.0.1".to_string();
        assert_eq!(record.target_host(), "10.0.0.1");
    }

    #[test]
    fn effective_username_defaults_to_os_user() {
        let mut record = ConnectionRecord::new("prod");
        assert_eq!(record.effective_username(), current_user());
        record.username = Some("alice".to_string());
        assert_eq!(record.effective_username(), "alice");
    }

    #[test]
    fn nickname_comparison_ignores_case() {
        let record = ConnectionRecord::new("Prod");
        assert!(record.has_nickname("prod"));
        assert!(!record.has_nickname("prod2"));
    }

    #[test]
    fn state_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(&Connecting));
        assert!(Connecting.can_transition_to(&Connected));
        assert!(Connecting.can_transition_to(&Failed("x".into())));
        assert!(Connected.can_transition_to(&Disconnected));
        assert!(Failed("x".into()).can_transition_to(&Connecting));

        assert!(!Disconnected.can_transition_to(&Connected));
        assert!(!Connected.can_transition_to(&Connecting));
        assert!(!Failed("x".into()).can_transition_to(&Connected));
    }
}

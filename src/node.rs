//! Cluster node descriptors and connection options.

use std::cmp::Ordering;
use std::fmt;

/// MySQL Group Replication role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    /// Accepts writes (`member_role = 'PRIMARY'`)
    Primary,
    /// Read replica (`member_role = 'SECONDARY'`)
    Secondary,
    /// Role not known yet (seed descriptors start here)
    #[default]
    Unknown,
}

impl Role {
    /// Parse the `member_role` wire string. Anything that is not `PRIMARY`
    /// or `SECONDARY` maps to [`Role::Unknown`].
    pub fn from_member_role(role: &str) -> Self {
        match role {
            "PRIMARY" => Self::Primary,
            "SECONDARY" => Self::Secondary,
            _ => Self::Unknown,
        }
    }

    /// The wire string (empty for [`Role::Unknown`]).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
            Self::Unknown => "",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One database endpoint, as seeded by the caller or observed by the
/// sentinel.
///
/// Equality compares `ip` and `role` and ignores `port`; ordering is by `ip`
/// alone. Membership comparison relies on both: a role flip on an unchanged
/// ip set must register as a change, while sorting and set union are keyed
/// purely by address.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// Host address
    pub ip: String,
    /// Port, in string form as reported by `member_port`
    pub port: String,
    /// Replication role
    pub role: Role,
}

impl NodeInfo {
    /// Seed descriptor with an unknown role.
    pub fn new(ip: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: port.into(),
            role: Role::Unknown,
        }
    }

    /// Descriptor with an explicit role.
    pub fn with_role(ip: impl Into<String>, port: impl Into<String>, role: Role) -> Self {
        Self {
            ip: ip.into(),
            port: port.into(),
            role,
        }
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        // port intentionally excluded
        self.ip == other.ip && self.role == other.role
    }
}

impl Eq for NodeInfo {}

impl PartialOrd for NodeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ip.cmp(&other.ip)
    }
}

/// Options used to establish one native session. Immutable per connection.
#[derive(Clone, Default)]
pub struct ConnectionOptions {
    /// Host address
    pub ip: String,
    /// Port in string form
    pub port: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
}

impl ConnectionOptions {
    /// Build options for one endpoint.
    pub fn new(
        ip: impl Into<String>,
        port: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            port: port.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Redact the password to prevent leaking credentials to logs.
        f.debug_struct("ConnectionOptions")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

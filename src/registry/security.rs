//! Security dimension of a route.

use std::fmt;

/// Which connection classification a service answers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityType {
    Secure,
    NonSecure,
    Both,
}

impl SecurityType {
    /// True for `Secure` and `Both`.
    pub fn includes_secure(self) -> bool {
        matches!(self, SecurityType::Secure | SecurityType::Both)
    }

    /// True for `NonSecure` and `Both`.
    pub fn includes_non_secure(self) -> bool {
        matches!(self, SecurityType::NonSecure | SecurityType::Both)
    }

    /// Classification of a presented connection.
    pub fn for_connection(secure: bool) -> Self {
        if secure {
            SecurityType::Secure
        } else {
            SecurityType::NonSecure
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityType::Secure => "secure",
            SecurityType::NonSecure => "non_secure",
            SecurityType::Both => "both",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

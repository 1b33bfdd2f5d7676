//! The closed set of component kinds a guest package may declare.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of an addressable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Foreground, user-facing entry point.
    Activity,
    /// Background worker.
    Service,
    /// Broadcast receiver.
    Receiver,
    /// Content provider addressed by authority.
    Provider,
}

impl ComponentKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 4] = [Self::Activity, Self::Service, Self::Receiver, Self::Provider];

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Service => "service",
            Self::Receiver => "receiver",
            Self::Provider => "provider",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "activity" => Ok(Self::Activity),
            "service" => Ok(Self::Service),
            "receiver" => Ok(Self::Receiver),
            "provider" => Ok(Self::Provider),
            _ => Err(CoreError::UnknownComponentKind(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("Service".parse::<ComponentKind>().unwrap(), ComponentKind::Service);
        assert!("widget".parse::<ComponentKind>().is_err());
        for kind in ComponentKind::ALL {
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        }
    }
}

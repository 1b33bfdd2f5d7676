//! Identifiers for synthetic users, application identities, packages and
//! components.
//!
//! A guest's runtime uid combines the synthetic user with the package's
//! application identity: `uid = user * PER_USER_RANGE + app_id`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Number of uids reserved for each synthetic user.
pub const PER_USER_RANGE: u32 = 100_000;

/// Maximum length of a package name.
const MAX_PACKAGE_NAME_LEN: usize = 255;

/// A synthetic user partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl UserId {
    /// Pseudo-user addressing every user at once. Only used in events.
    pub const ALL: Self = Self(-1);
    /// The owner user, which always exists.
    pub const SYSTEM: Self = Self(0);

    /// Whether this id names a concrete user partition.
    #[must_use]
    pub fn is_concrete(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable application identity shared by every user of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u32);

impl AppId {
    /// First identity handed out to guest packages.
    pub const FIRST: Self = Self(10_000);
    /// Last identity that may be handed out.
    pub const LAST: Self = Self(19_999);

    /// Whether this identity lies inside the application range.
    #[must_use]
    pub fn is_application(self) -> bool {
        (Self::FIRST..=Self::LAST).contains(&self)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compose the runtime uid for `app` running as `user`.
///
/// Returns `None` for pseudo-users and on overflow.
#[must_use]
pub fn uid(user: UserId, app: AppId) -> Option<u32> {
    let user = u32::try_from(user.0).ok()?;
    user.checked_mul(PER_USER_RANGE)?.checked_add(app.0)
}

/// Extract the application identity from a runtime uid.
#[must_use]
pub fn app_id_of(uid: u32) -> AppId {
    AppId(uid.checked_rem(PER_USER_RANGE).unwrap_or(uid))
}

/// Extract the synthetic user from a runtime uid.
#[must_use]
pub fn user_of(uid: u32) -> UserId {
    uid.checked_div(PER_USER_RANGE)
        .and_then(|u| i32::try_from(u).ok())
        .map_or(UserId::SYSTEM, UserId)
}

/// A validated, dot-separated package name such as `com.example.notes`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Parse and validate a package name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPackageName`] if the name has fewer than
    /// two segments, a segment does not start with a letter, or it contains
    /// characters outside `[A-Za-z0-9_]`.
    pub fn parse(name: &str) -> CoreResult<Self> {
        let reject = |reason| CoreError::InvalidPackageName {
            name: name.to_owned(),
            reason,
        };

        if name.is_empty() {
            return Err(reject("empty"));
        }
        if name.len() > MAX_PACKAGE_NAME_LEN {
            return Err(reject("too long"));
        }

        let mut segments = 0usize;
        for segment in name.split('.') {
            let mut chars = segment.chars();
            match chars.next() {
                None => return Err(reject("empty segment")),
                Some(c) if !c.is_ascii_alphabetic() => {
                    return Err(reject("segment must start with a letter"));
                },
                Some(_) => {},
            }
            if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(reject("illegal character"));
            }
            segments = segments.saturating_add(1);
        }

        if segments < 2 {
            return Err(reject("must have at least two segments"));
        }

        Ok(Self(name.to_owned()))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageName> for String {
    fn from(value: PackageName) -> Self {
        value.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fully-qualified address of a component: owning package plus class name.
///
/// The component refers to its owner by name only; anything that needs the
/// owning record looks it up in the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentName {
    package: PackageName,
    class: String,
}

impl ComponentName {
    /// Build a component name, expanding manifest shorthand.
    ///
    /// `.Main` and `Main` both become `<package>.Main`; names that already
    /// contain a dot elsewhere are taken as fully qualified.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidComponentName`] for empty names or names
    /// containing `/` or whitespace.
    pub fn expand(package: &PackageName, raw: &str) -> CoreResult<Self> {
        if raw.is_empty()
            || raw == "."
            || raw.contains('/')
            || raw.chars().any(char::is_whitespace)
        {
            return Err(CoreError::InvalidComponentName(raw.to_owned()));
        }

        let class = if raw.starts_with('.') {
            format!("{package}{raw}")
        } else if raw.contains('.') {
            raw.to_owned()
        } else {
            format!("{package}.{raw}")
        };

        Ok(Self {
            package: package.clone(),
            class,
        })
    }

    /// Owning package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        &self.package
    }

    /// Fully-qualified class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// `package/.Class` when the class lives under the package, otherwise
    /// the full form.
    #[must_use]
    pub fn to_short_string(&self) -> String {
        match self.class.strip_prefix(self.package.as_str()) {
            Some(rest) if rest.starts_with('.') => format!("{}/{rest}", self.package),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

impl FromStr for ComponentName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (package, class) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidComponentName(s.to_owned()))?;
        let package = PackageName::parse(package)?;
        Self::expand(&package, class)
    }
}

impl TryFrom<String> for ComponentName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComponentName> for String {
    fn from(value: ComponentName) -> Self {
        value.to_string()
    }
}

//! Parsed package descriptors and their component declarations.

use std::collections::{BTreeMap, BTreeSet};

use enclave_core::{ComponentKind, ComponentName, PackageName};
use serde::{Deserialize, Serialize};

use crate::error::{PmError, PmResult};
use crate::request::RoutingRequest;

/// Matching criteria a component declares.
///
/// Comparison is exact set membership:
/// - a request action must be declared; a request without one matches only a
///   filter that declares at least one action
/// - every request category must be declared
/// - a request scheme or MIME type must be declared; when the request has
///   none, the filter must declare none either
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchFilter {
    /// Accepted actions.
    pub actions: BTreeSet<String>,
    /// Accepted categories.
    pub categories: BTreeSet<String>,
    /// Accepted data schemes.
    pub schemes: BTreeSet<String>,
    /// Accepted data MIME types.
    pub mime_types: BTreeSet<String>,
}

impl MatchFilter {
    /// A filter accepting one action.
    #[must_use]
    pub fn for_action(action: impl Into<String>) -> Self {
        let mut filter = Self::default();
        filter.actions.insert(action.into());
        filter
    }

    /// Add a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    /// Add a data scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.schemes.insert(scheme.into());
        self
    }

    /// Add a MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_types.insert(mime_type.into());
        self
    }

    /// Whether this filter accepts the request.
    #[must_use]
    pub fn matches(&self, request: &RoutingRequest) -> bool {
        let action_ok = match &request.action {
            Some(action) => self.actions.contains(action),
            None => !self.actions.is_empty(),
        };
        if !action_ok {
            return false;
        }

        if !request.categories.is_subset(&self.categories) {
            return false;
        }

        let scheme_ok = match &request.scheme {
            Some(scheme) => self.schemes.contains(scheme),
            None => self.schemes.is_empty(),
        };
        let type_ok = match &request.mime_type {
            Some(mime) => self.mime_types.contains(mime),
            None => self.mime_types.is_empty(),
        };

        scheme_ok && type_ok
    }
}

fn default_true() -> bool {
    true
}

/// One declared component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDecl {
    /// Fully-qualified name; also identifies the owning package.
    pub name: ComponentName,
    /// Kind.
    pub kind: ComponentKind,
    /// Declared match filters.
    #[serde(default)]
    pub filters: Vec<MatchFilter>,
    /// Higher wins.
    #[serde(default)]
    pub priority: i32,
    /// Higher wins when priorities tie.
    #[serde(default)]
    pub preferred_order: i32,
    /// Preferred when priority and order tie.
    #[serde(default)]
    pub is_default: bool,
    /// Declared enabled state; per-user overrides win.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Reachable from other packages.
    #[serde(default)]
    pub exported: bool,
    /// Process override; the package process otherwise.
    #[serde(default)]
    pub process: Option<String>,
    /// Runs before the user's credential storage is unlocked.
    #[serde(default)]
    pub direct_boot_aware: bool,
    /// Provider authorities.
    #[serde(default)]
    pub authorities: Vec<String>,
    /// Declared meta-data.
    #[serde(default)]
    pub meta_data: BTreeMap<String, String>,
}

impl ComponentDecl {
    /// A component with default attributes.
    #[must_use]
    pub fn new(name: ComponentName, kind: ComponentKind) -> Self {
        Self {
            name,
            kind,
            filters: Vec::new(),
            priority: 0,
            preferred_order: 0,
            is_default: false,
            enabled: true,
            exported: false,
            process: None,
            direct_boot_aware: false,
            authorities: Vec::new(),
            meta_data: BTreeMap::new(),
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: MatchFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the preferred order.
    #[must_use]
    pub fn with_preferred_order(mut self, order: i32) -> Self {
        self.preferred_order = order;
        self
    }

    /// Flag as default.
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Add a provider authority.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }

    /// Owning package.
    #[must_use]
    pub fn package(&self) -> &PackageName {
        self.name.package()
    }

    /// Whether any declared filter accepts the request.
    #[must_use]
    pub fn matches(&self, request: &RoutingRequest) -> bool {
        self.filters.iter().any(|f| f.matches(request))
    }

    /// Copy without meta-data, for callers that did not ask for it.
    #[must_use]
    pub fn without_meta_data(mut self) -> Self {
        self.meta_data.clear();
        self
    }
}

/// Everything parsed out of a package artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Package name.
    pub package_name: PackageName,
    /// Monotonic version number.
    #[serde(default)]
    pub version_code: u64,
    /// Display version.
    #[serde(default)]
    pub version_name: Option<String>,
    /// Shared identity group key.
    #[serde(default)]
    pub shared_group: Option<String>,
    /// Display label.
    #[serde(default)]
    pub label: Option<String>,
    /// Default process name for every component.
    pub process_name: String,
    /// Activity-like components.
    #[serde(default)]
    pub activities: Vec<ComponentDecl>,
    /// Service-like components.
    #[serde(default)]
    pub services: Vec<ComponentDecl>,
    /// Receiver-like components.
    #[serde(default)]
    pub receivers: Vec<ComponentDecl>,
    /// Provider-like components.
    #[serde(default)]
    pub providers: Vec<ComponentDecl>,
    /// Application meta-data.
    #[serde(default)]
    pub meta_data: BTreeMap<String, String>,
}

impl PackageDescriptor {
    /// An empty descriptor whose process name is the package name.
    #[must_use]
    pub fn new(package_name: PackageName) -> Self {
        Self {
            process_name: package_name.to_string(),
            package_name,
            version_code: 1,
            version_name: None,
            shared_group: None,
            label: None,
            activities: Vec::new(),
            services: Vec::new(),
            receivers: Vec::new(),
            providers: Vec::new(),
            meta_data: BTreeMap::new(),
        }
    }

    /// Components of one kind.
    #[must_use]
    pub fn components(&self, kind: ComponentKind) -> &[ComponentDecl] {
        match kind {
            ComponentKind::Activity => &self.activities,
            ComponentKind::Service => &self.services,
            ComponentKind::Receiver => &self.receivers,
            ComponentKind::Provider => &self.providers,
        }
    }

    fn components_mut(&mut self, kind: ComponentKind) -> &mut Vec<ComponentDecl> {
        match kind {
            ComponentKind::Activity => &mut self.activities,
            ComponentKind::Service => &mut self.services,
            ComponentKind::Receiver => &mut self.receivers,
            ComponentKind::Provider => &mut self.providers,
        }
    }

    /// Append a component to the list matching its kind.
    pub fn add_component(&mut self, decl: ComponentDecl) {
        self.components_mut(decl.kind).push(decl);
    }

    /// Every component across all kinds.
    pub fn all_components(&self) -> impl Iterator<Item = &ComponentDecl> {
        ComponentKind::ALL
            .into_iter()
            .flat_map(move |kind| self.components(kind).iter())
    }

    /// Find a component by kind and name.
    #[must_use]
    pub fn find(&self, kind: ComponentKind, name: &ComponentName) -> Option<&ComponentDecl> {
        self.components(kind).iter().find(|c| &c.name == name)
    }

    /// Find a component of any kind.
    #[must_use]
    pub fn find_any(&self, name: &ComponentName) -> Option<&ComponentDecl> {
        self.all_components().find(|c| &c.name == name)
    }

    /// Process a component runs in.
    #[must_use]
    pub fn process_for<'a>(&'a self, decl: &'a ComponentDecl) -> &'a str {
        decl.process.as_deref().unwrap_or(&self.process_name)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`PmError::Manifest`] if a component belongs to another
    /// package, sits in the wrong kind list, or is declared twice.
    pub fn validate(&self) -> PmResult<()> {
        let mut seen = BTreeSet::new();
        for kind in ComponentKind::ALL {
            for decl in self.components(kind) {
                if decl.package() != &self.package_name {
                    return Err(PmError::Manifest(format!(
                        "component {} does not belong to {}",
                        decl.name, self.package_name
                    )));
                }
                if decl.kind != kind {
                    return Err(PmError::Manifest(format!(
                        "component {} declared as {} but listed under {kind}",
                        decl.name, decl.kind
                    )));
                }
                if !seen.insert(&decl.name) {
                    return Err(PmError::Manifest(format!(
                        "component {} declared twice",
                        decl.name
                    )));
                }
                if kind != ComponentKind::Provider && !decl.authorities.is_empty() {
                    return Err(PmError::Manifest(format!(
                        "only providers may declare authorities ({})",
                        decl.name
                    )));
                }
            }
        }
        Ok(())
    }
}

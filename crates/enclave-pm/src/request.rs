//! Routing requests: what a caller asks the resolver to find.

use std::collections::BTreeSet;

use enclave_core::{ComponentName, PackageName};
use serde::{Deserialize, Serialize};

/// A request naming either an explicit target or implicit match criteria.
///
/// When `component` is unset and a `selector` is present, the selector is
/// resolved in place of the outer request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRequest {
    /// Explicit target.
    pub component: Option<ComponentName>,
    /// Restrict implicit matching to one package.
    pub package: Option<PackageName>,
    /// Action string.
    pub action: Option<String>,
    /// Categories; every one must be declared by a matching filter.
    pub categories: BTreeSet<String>,
    /// Data scheme.
    pub scheme: Option<String>,
    /// Data MIME type.
    pub mime_type: Option<String>,
    /// Replacement request used for matching when no explicit target is set.
    pub selector: Option<Box<RoutingRequest>>,
}

impl RoutingRequest {
    /// A request for one specific component.
    #[must_use]
    pub fn explicit(component: ComponentName) -> Self {
        Self {
            component: Some(component),
            ..Self::default()
        }
    }

    /// An implicit request carrying an action.
    #[must_use]
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    /// Add a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    /// Set the data scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    /// Set the data MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Scope implicit matching to a package.
    #[must_use]
    pub fn in_package(mut self, package: PackageName) -> Self {
        self.package = Some(package);
        self
    }

    /// Attach a selector.
    #[must_use]
    pub fn with_selector(mut self, selector: RoutingRequest) -> Self {
        self.selector = Some(Box::new(selector));
        self
    }

    /// The request actually used for resolution.
    #[must_use]
    pub fn effective(&self) -> &RoutingRequest {
        match (&self.component, &self.selector) {
            (None, Some(selector)) => selector,
            _ => self,
        }
    }

    /// Explicit target of the effective request, if any.
    #[must_use]
    pub fn explicit_target(&self) -> Option<&ComponentName> {
        self.effective().component.as_ref()
    }
}

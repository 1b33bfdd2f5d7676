//! Component index and routing request resolution.
//!
//! The index is rebuilt per package with a full remove-then-add; there is no
//! partial patching, so a reinstall can never leave stale components behind.
//! Owning records are looked up by package name from the registry map passed
//! into every query.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use enclave_core::{ComponentKind, ComponentName, PackageName, QueryFlags, UserId};
use tracing::{debug, trace, warn};

use crate::descriptor::{ComponentDecl, PackageDescriptor};
use crate::record::PackageRecord;
use crate::request::RoutingRequest;

/// Registered packages, keyed by name.
pub type PackageMap = BTreeMap<PackageName, PackageRecord>;

/// Index of every declared component, by kind.
#[derive(Debug, Default)]
pub struct ComponentResolver {
    components: HashMap<ComponentKind, HashMap<ComponentName, ComponentDecl>>,
    authorities: HashMap<String, ComponentName>,
}

/// Ranking order: priority, then preferred order, then default first.
fn rank(a: &ComponentDecl, b: &ComponentDecl) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.preferred_order.cmp(&a.preferred_order))
        .then_with(|| b.is_default.cmp(&a.is_default))
}

impl ComponentResolver {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every component of a package, replacing whatever was indexed
    /// for it before.
    pub fn add_package(&mut self, descriptor: &PackageDescriptor) {
        self.remove_package(&descriptor.package_name);

        for decl in descriptor.all_components() {
            if decl.kind == ComponentKind::Provider {
                for authority in &decl.authorities {
                    match self.authorities.get(authority) {
                        Some(owner) => warn!(
                            authority = %authority,
                            owner = %owner,
                            ignored = %decl.name,
                            "Provider authority already claimed"
                        ),
                        None => {
                            self.authorities.insert(authority.clone(), decl.name.clone());
                        },
                    }
                }
            }
            self.components
                .entry(decl.kind)
                .or_default()
                .insert(decl.name.clone(), decl.clone());
        }

        trace!(
            package = %descriptor.package_name,
            components = descriptor.all_components().count(),
            "Indexed package"
        );
    }

    /// Drop every indexed component of a package.
    pub fn remove_package(&mut self, package: &PackageName) {
        for by_name in self.components.values_mut() {
            by_name.retain(|name, _| name.package() != package);
        }
        self.authorities.retain(|_, name| name.package() != package);
    }

    /// Number of indexed components of one kind.
    #[must_use]
    pub fn len(&self, kind: ComponentKind) -> usize {
        self.components.get(&kind).map_or(0, HashMap::len)
    }

    /// Whether nothing at all is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.values().all(HashMap::is_empty)
    }

    /// Look a component up by name, applying the per-user checks.
    #[must_use]
    pub fn lookup(
        &self,
        kind: ComponentKind,
        name: &ComponentName,
        flags: QueryFlags,
        user: UserId,
        packages: &PackageMap,
    ) -> Option<ComponentDecl> {
        let decl = self.components.get(&kind)?.get(name)?;
        usable(decl, flags, user, packages).then(|| decl.clone())
    }

    /// Resolve to a single best component.
    ///
    /// Returns `None` when nothing matches, or when the two best candidates
    /// tie on priority, preferred order and default flag; the caller must
    /// then offer a choice.
    #[must_use]
    pub fn resolve(
        &self,
        kind: ComponentKind,
        request: &RoutingRequest,
        flags: QueryFlags,
        user: UserId,
        packages: &PackageMap,
    ) -> Option<ComponentDecl> {
        let mut candidates = self.resolve_many(kind, request, flags, user, packages);
        match candidates.len() {
            0 => None,
            1 => candidates.pop(),
            _ => {
                if rank(&candidates[0], &candidates[1]) == Ordering::Equal {
                    debug!(
                        kind = %kind,
                        first = %candidates[0].name,
                        second = %candidates[1].name,
                        "Ambiguous resolution"
                    );
                    None
                } else {
                    Some(candidates.swap_remove(0))
                }
            },
        }
    }

    /// Resolve to every matching component, best first.
    #[must_use]
    pub fn resolve_many(
        &self,
        kind: ComponentKind,
        request: &RoutingRequest,
        flags: QueryFlags,
        user: UserId,
        packages: &PackageMap,
    ) -> Vec<ComponentDecl> {
        if !user.is_concrete() {
            return Vec::new();
        }

        if let Some(target) = request.explicit_target() {
            return self
                .lookup(kind, target, flags, user, packages)
                .into_iter()
                .collect();
        }

        let request = request.effective();
        let Some(by_name) = self.components.get(&kind) else {
            return Vec::new();
        };

        let mut candidates: Vec<ComponentDecl> = by_name
            .values()
            .filter(|decl| {
                request
                    .package
                    .as_ref()
                    .is_none_or(|scope| decl.package() == scope)
            })
            .filter(|decl| !flags.contains(QueryFlags::MATCH_DEFAULT_ONLY) || decl.is_default)
            .filter(|decl| decl.matches(request))
            .filter(|decl| usable(decl, flags, user, packages))
            .cloned()
            .collect();

        candidates.sort_by(|a, b| rank(a, b).then_with(|| a.name.cmp(&b.name)));
        candidates
    }

    /// Provider claiming an authority.
    #[must_use]
    pub fn resolve_authority(
        &self,
        authority: &str,
        flags: QueryFlags,
        user: UserId,
        packages: &PackageMap,
    ) -> Option<ComponentDecl> {
        let name = self.authorities.get(authority)?;
        self.lookup(ComponentKind::Provider, name, flags, user, packages)
    }

    /// Providers running in a process, sorted by name.
    #[must_use]
    pub fn providers_for_process(
        &self,
        process: &str,
        flags: QueryFlags,
        user: UserId,
        packages: &PackageMap,
    ) -> Vec<ComponentDecl> {
        let Some(providers) = self.components.get(&ComponentKind::Provider) else {
            return Vec::new();
        };

        let mut found: Vec<ComponentDecl> = providers
            .values()
            .filter(|decl| {
                packages
                    .get(decl.package())
                    .is_some_and(|r| r.descriptor.process_for(decl) == process)
            })
            .filter(|decl| usable(decl, flags, user, packages))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

/// Installed for the user, enabled for the user, and direct-boot compatible
/// with the flags.
fn usable(decl: &ComponentDecl, flags: QueryFlags, user: UserId, packages: &PackageMap) -> bool {
    let Some(record) = packages.get(decl.package()) else {
        return false;
    };
    if !record.is_installed(user) {
        return false;
    }
    if !flags.contains(QueryFlags::MATCH_DISABLED_COMPONENTS)
        && !record.is_component_enabled(decl, user)
    {
        return false;
    }
    flags.matches_direct_boot(decl.direct_boot_aware)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use enclave_core::{AppId, InstallFlags};

    use super::*;
    use crate::descriptor::MatchFilter;

    const VIEW: &str = "android.intent.action.VIEW";

    fn pkg(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    fn activity(package: &str, class: &str) -> ComponentDecl {
        ComponentDecl::new(
            ComponentName::expand(&pkg(package), class).unwrap(),
            ComponentKind::Activity,
        )
        .with_filter(MatchFilter::for_action(VIEW))
    }

    struct Fixture {
        resolver: ComponentResolver,
        packages: PackageMap,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                resolver: ComponentResolver::new(),
                packages: PackageMap::new(),
            }
        }

        fn install(&mut self, package: &str, decls: Vec<ComponentDecl>, users: &[i32]) {
            let mut descriptor = PackageDescriptor::new(pkg(package));
            for d in decls {
                descriptor.add_component(d);
            }
            let mut record = PackageRecord::new(
                descriptor,
                AppId::FIRST,
                InstallFlags::empty(),
                PathBuf::from("/dev/null"),
            );
            for u in users {
                record.mark_installed(UserId(*u));
            }
            self.resolver.add_package(&record.descriptor);
            self.packages.insert(pkg(package), record);
        }

        fn resolve(&self, req: &RoutingRequest, user: i32) -> Option<ComponentDecl> {
            self.resolver.resolve(
                ComponentKind::Activity,
                req,
                QueryFlags::empty(),
                UserId(user),
                &self.packages,
            )
        }

        fn resolve_many(&self, req: &RoutingRequest, user: i32) -> Vec<ComponentDecl> {
            self.resolver.resolve_many(
                ComponentKind::Activity,
                req,
                QueryFlags::empty(),
                UserId(user),
                &self.packages,
            )
        }
    }

    #[test]
    fn test_explicit_target_wins_over_implicit_matches() {
        let mut f = Fixture::new();
        f.install("com.example.p", vec![activity("com.example.p", ".X")], &[0]);
        f.install(
            "com.example.q",
            vec![activity("com.example.q", ".Y").with_priority(100)],
            &[0],
        );

        let target: ComponentName = "com.example.p/.X".parse().unwrap();
        let mut req = RoutingRequest::explicit(target.clone());
        req.action = Some(VIEW.into());

        assert_eq!(f.resolve(&req, 0).unwrap().name, target);
        assert_eq!(f.resolve_many(&req, 0).len(), 1);
    }

    #[test]
    fn test_explicit_target_missing_skips_implicit() {
        let mut f = Fixture::new();
        f.install("com.example.q", vec![activity("com.example.q", ".Y")], &[0]);

        let mut req = RoutingRequest::explicit("com.example.p/.X".parse().unwrap());
        req.action = Some(VIEW.into());
        assert!(f.resolve(&req, 0).is_none());
        assert!(f.resolve_many(&req, 0).is_empty());
    }

    #[test]
    fn test_tie_break_priorities_5_5_3() {
        let mut f = Fixture::new();
        f.install(
            "com.example.a",
            vec![activity("com.example.a", ".A").with_priority(5)],
            &[0],
        );
        f.install(
            "com.example.b",
            vec![activity("com.example.b", ".B").with_priority(5)],
            &[0],
        );
        f.install(
            "com.example.c",
            vec![activity("com.example.c", ".C").with_priority(3)],
            &[0],
        );

        let req = RoutingRequest::action(VIEW);
        assert!(f.resolve(&req, 0).is_none());

        let all = f.resolve_many(&req, 0);
        let priorities: Vec<i32> = all.iter().map(|d| d.priority).collect();
        assert_eq!(priorities, vec![5, 5, 3]);
        assert_eq!(all[2].package().as_str(), "com.example.c");
    }

    #[test]
    fn test_preferred_order_then_default_break_ties() {
        let mut f = Fixture::new();
        f.install(
            "com.example.a",
            vec![activity("com.example.a", ".A").with_priority(5)],
            &[0],
        );
        f.install(
            "com.example.b",
            vec![
                activity("com.example.b", ".B")
                    .with_priority(5)
                    .with_preferred_order(1),
            ],
            &[0],
        );
        let req = RoutingRequest::action(VIEW);
        assert_eq!(f.resolve(&req, 0).unwrap().package().as_str(), "com.example.b");

        let mut g = Fixture::new();
        g.install("com.example.a", vec![activity("com.example.a", ".A")], &[0]);
        g.install(
            "com.example.b",
            vec![activity("com.example.b", ".B").as_default()],
            &[0],
        );
        assert_eq!(g.resolve(&req, 0).unwrap().package().as_str(), "com.example.b");
    }

    #[test]
    fn test_user_scoping() {
        let mut f = Fixture::new();
        f.install("com.example.a", vec![activity("com.example.a", ".A")], &[1]);

        let req = RoutingRequest::action(VIEW);
        assert!(f.resolve(&req, 0).is_none());
        assert!(f.resolve(&req, 1).is_some());
        assert!(f.resolve(&req, 7).is_none());
        assert!(f.resolve_many(&req, -1).is_empty());
    }

    #[test]
    fn test_disabled_component_filtered_unless_flag() {
        let mut f = Fixture::new();
        f.install("com.example.a", vec![activity("com.example.a", ".A")], &[0]);
        let name: ComponentName = "com.example.a/.A".parse().unwrap();
        f.packages
            .get_mut(&pkg("com.example.a"))
            .unwrap()
            .user_state_mut(UserId(0))
            .set_enabled(&name, false);

        let req = RoutingRequest::action(VIEW);
        assert!(f.resolve(&req, 0).is_none());
        assert!(
            f.resolver
                .resolve(
                    ComponentKind::Activity,
                    &req,
                    QueryFlags::MATCH_DISABLED_COMPONENTS,
                    UserId(0),
                    &f.packages
                )
                .is_some()
        );
    }

    #[test]
    fn test_direct_boot_filtering() {
        let mut f = Fixture::new();
        let mut aware = activity("com.example.a", ".Aware");
        aware.direct_boot_aware = true;
        f.install(
            "com.example.a",
            vec![aware, activity("com.example.a", ".Plain")],
            &[0],
        );

        let req = RoutingRequest::action(VIEW);
        let only_aware = f.resolver.resolve_many(
            ComponentKind::Activity,
            &req,
            QueryFlags::MATCH_DIRECT_BOOT_AWARE,
            UserId(0),
            &f.packages,
        );
        assert_eq!(only_aware.len(), 1);
        assert!(only_aware[0].direct_boot_aware);
        assert_eq!(f.resolve_many(&req, 0).len(), 2);
    }

    #[test]
    fn test_package_scope() {
        let mut f = Fixture::new();
        f.install("com.example.a", vec![activity("com.example.a", ".A")], &[0]);
        f.install("com.example.b", vec![activity("com.example.b", ".B")], &[0]);

        let req = RoutingRequest::action(VIEW).in_package(pkg("com.example.b"));
        let found = f.resolve_many(&req, 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].package().as_str(), "com.example.b");
    }

    #[test]
    fn test_reindex_replaces_components() {
        let mut f = Fixture::new();
        f.install("com.example.a", vec![activity("com.example.a", ".Old")], &[0]);
        f.install("com.example.a", vec![activity("com.example.a", ".New")], &[0]);

        let found = f.resolve_many(&RoutingRequest::action(VIEW), 0);
        assert_eq!(found.len(), 1);
        assert!(found[0].name.class().ends_with(".New"));

        f.resolver.remove_package(&pkg("com.example.a"));
        assert!(f.resolver.is_empty());
    }

    #[test]
    fn test_authority_and_process_lookup() {
        let mut f = Fixture::new();
        let provider = ComponentDecl::new(
            ComponentName::expand(&pkg("com.example.a"), ".Files").unwrap(),
            ComponentKind::Provider,
        )
        .with_authority("com.example.a.files");
        f.install("com.example.a", vec![provider], &[0]);

        let found = f
            .resolver
            .resolve_authority("com.example.a.files", QueryFlags::empty(), UserId(0), &f.packages)
            .unwrap();
        assert!(found.name.class().ends_with(".Files"));
        assert!(
            f.resolver
                .resolve_authority("com.example.a.files", QueryFlags::empty(), UserId(1), &f.packages)
                .is_none()
        );

        let by_process = f.resolver.providers_for_process(
            "com.example.a",
            QueryFlags::empty(),
            UserId(0),
            &f.packages,
        );
        assert_eq!(by_process.len(), 1);
    }
}

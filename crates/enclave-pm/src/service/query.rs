//! Read-only queries. Each takes the registry read lock once.

use enclave_core::{ComponentKind, ComponentName, PackageName, QueryFlags, UserId, ids};

use super::{ApplicationInfo, PackageInfo, PackageManager};
use crate::descriptor::ComponentDecl;
use crate::record::PackageRecord;
use crate::request::RoutingRequest;

fn strip(decls: Vec<ComponentDecl>, flags: QueryFlags) -> Vec<ComponentDecl> {
    if flags.contains(QueryFlags::GET_META_DATA) {
        decls
    } else {
        decls.into_iter().map(ComponentDecl::without_meta_data).collect()
    }
}

fn strip_one(decl: Option<ComponentDecl>, flags: QueryFlags) -> Option<ComponentDecl> {
    if flags.contains(QueryFlags::GET_META_DATA) {
        decl
    } else {
        decl.map(ComponentDecl::without_meta_data)
    }
}

impl PackageManager {
    /// Whether `package` is installed for `user`.
    #[must_use]
    pub fn is_installed(&self, package: &PackageName, user: UserId) -> bool {
        self.read_state()
            .packages
            .get(package)
            .is_some_and(|r| r.is_installed(user))
    }

    /// Package view for `user`, or `None` when not installed for them.
    #[must_use]
    pub fn package_info(&self, package: &PackageName, flags: QueryFlags, user: UserId) -> Option<PackageInfo> {
        let state = self.read_state();
        let record = state.packages.get(package)?;
        self.build_package_info(record, flags, user)
    }

    /// Runtime environment of `package` for `user`.
    #[must_use]
    pub fn application_info(
        &self,
        package: &PackageName,
        flags: QueryFlags,
        user: UserId,
    ) -> Option<ApplicationInfo> {
        let state = self.read_state();
        let record = state.packages.get(package)?;
        self.build_application_info(record, flags, user)
    }

    /// Explicit component lookup with installed and enabled checks.
    #[must_use]
    pub fn component_info(
        &self,
        kind: ComponentKind,
        name: &ComponentName,
        flags: QueryFlags,
        user: UserId,
    ) -> Option<ComponentDecl> {
        let flags = flags.normalized();
        let state = self.read_state();
        strip_one(state.resolver.lookup(kind, name, flags, user, &state.packages), flags)
    }

    /// Every component matching `request`, best first.
    #[must_use]
    pub fn query_components(
        &self,
        kind: ComponentKind,
        request: &RoutingRequest,
        flags: QueryFlags,
        user: UserId,
    ) -> Vec<ComponentDecl> {
        let flags = flags.normalized();
        let state = self.read_state();
        strip(state.resolver.resolve_many(kind, request, flags, user, &state.packages), flags)
    }

    /// The single best component for `request`, or `None` when nothing
    /// matches or the best candidates tie.
    #[must_use]
    pub fn resolve_component(
        &self,
        kind: ComponentKind,
        request: &RoutingRequest,
        flags: QueryFlags,
        user: UserId,
    ) -> Option<ComponentDecl> {
        let flags = flags.normalized();
        let state = self.read_state();
        strip_one(state.resolver.resolve(kind, request, flags, user, &state.packages), flags)
    }

    /// Provider claiming `authority`.
    #[must_use]
    pub fn resolve_provider(&self, authority: &str, flags: QueryFlags, user: UserId) -> Option<ComponentDecl> {
        let flags = flags.normalized();
        let state = self.read_state();
        strip_one(
            state.resolver.resolve_authority(authority, flags, user, &state.packages),
            flags,
        )
    }

    /// Providers that run in `process`.
    #[must_use]
    pub fn query_providers(&self, process: &str, flags: QueryFlags, user: UserId) -> Vec<ComponentDecl> {
        let flags = flags.normalized();
        let state = self.read_state();
        strip(
            state.resolver.providers_for_process(process, flags, user, &state.packages),
            flags,
        )
    }

    /// Packages installed for `user`, sorted by name.
    #[must_use]
    pub fn installed_packages(&self, flags: QueryFlags, user: UserId) -> Vec<PackageInfo> {
        let state = self.read_state();
        state
            .packages
            .values()
            .filter_map(|record| self.build_package_info(record, flags, user))
            .collect()
    }

    /// Packages running under `uid`: everything sharing its application
    /// identity and installed for its user.
    #[must_use]
    pub fn packages_for_uid(&self, uid: u32) -> Vec<PackageName> {
        let user = ids::user_of(uid);
        let sharing = self.identities.packages_with(ids::app_id_of(uid));
        let state = self.read_state();
        sharing
            .into_iter()
            .filter(|p| state.packages.get(p).is_some_and(|r| r.is_installed(user)))
            .collect()
    }

    /// Per-user identity of `package`.
    #[must_use]
    pub fn uid_for_package(&self, package: &PackageName, user: UserId) -> Option<u32> {
        let state = self.read_state();
        let record = state.packages.get(package)?;
        if !record.is_installed(user) {
            return None;
        }
        ids::uid(user, record.app_id)
    }

    fn build_application_info(
        &self,
        record: &PackageRecord,
        flags: QueryFlags,
        user: UserId,
    ) -> Option<ApplicationInfo> {
        if !record.is_installed(user) {
            return None;
        }
        let package = record.name();
        Some(ApplicationInfo {
            package_name: package.clone(),
            app_id: record.app_id,
            uid: ids::uid(user, record.app_id)?,
            process_name: record.descriptor.process_name.clone(),
            code_path: record.code_path.clone(),
            native_library_dir: self.layout.native_lib_dir_for(package),
            data_dir: self.layout.user_data_dir_for(package, user),
            device_protected_data_dir: self.layout.user_de_data_dir_for(package, user),
            external_data_dir: self.layout.external_data_dir_for(package, user),
            system: record.install_flags.contains(enclave_core::InstallFlags::SYSTEM),
            stopped: record.user_state(user).is_some_and(|s| s.stopped),
            meta_data: if flags.contains(QueryFlags::GET_META_DATA) {
                record.descriptor.meta_data.clone()
            } else {
                std::collections::BTreeMap::new()
            },
        })
    }

    fn build_package_info(&self, record: &PackageRecord, flags: QueryFlags, user: UserId) -> Option<PackageInfo> {
        let application = self.build_application_info(record, flags, user)?;
        let descriptor = &record.descriptor;
        let components = |kind: ComponentKind| {
            if flags.contains(QueryFlags::GET_COMPONENTS) {
                strip(descriptor.components(kind).to_vec(), flags)
            } else {
                Vec::new()
            }
        };

        Some(PackageInfo {
            package_name: record.name().clone(),
            uid: application.uid,
            version_code: descriptor.version_code,
            version_name: descriptor.version_name.clone(),
            label: descriptor.label.clone(),
            shared_group: descriptor.shared_group.clone(),
            install_flags: record.install_flags,
            first_install_time: record.first_install_time,
            last_update_time: record.last_update_time,
            activities: components(ComponentKind::Activity),
            services: components(ComponentKind::Service),
            receivers: components(ComponentKind::Receiver),
            providers: components(ComponentKind::Provider),
            application,
        })
    }
}

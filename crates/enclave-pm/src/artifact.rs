//! The default artifact format: a tar archive, optionally gzip-compressed,
//! carrying a root `Package.toml` manifest and native code under
//! `lib/<abi>/`.
//!
//! Archives are read with the same guards as any untrusted tarball:
//! - no absolute paths or `..` components
//! - regular files and directories only
//! - bounded entry count and extracted size

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use enclave_core::{ComponentKind, ComponentName, PackageName};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;
use tracing::debug;

use crate::collab::ArtifactParser;
use crate::descriptor::{ComponentDecl, MatchFilter, PackageDescriptor};
use crate::error::{PmError, PmResult};

/// Manifest file name at the archive root.
pub const MANIFEST_NAME: &str = "Package.toml";

/// Maximum number of entries allowed in an artifact.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum total extracted size (500 MB).
const MAX_EXTRACTED_SIZE: u64 = 500_000_000;

/// Maximum manifest size (1 MB).
const MAX_MANIFEST_SIZE: u64 = 1_048_576;

/// Gzip magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Deserialize)]
struct Manifest {
    package: String,
    #[serde(default = "default_version_code")]
    version_code: u64,
    #[serde(default)]
    version_name: Option<String>,
    #[serde(default)]
    shared_group: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    process: Option<String>,
    #[serde(default, rename = "activity")]
    activities: Vec<ComponentManifest>,
    #[serde(default, rename = "service")]
    services: Vec<ComponentManifest>,
    #[serde(default, rename = "receiver")]
    receivers: Vec<ComponentManifest>,
    #[serde(default, rename = "provider")]
    providers: Vec<ComponentManifest>,
    #[serde(default)]
    meta_data: BTreeMap<String, String>,
}

fn default_version_code() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct ComponentManifest {
    name: String,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    preferred_order: i32,
    #[serde(default, rename = "default")]
    is_default: bool,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    exported: Option<bool>,
    #[serde(default)]
    process: Option<String>,
    #[serde(default)]
    direct_boot_aware: bool,
    #[serde(default)]
    authorities: Vec<String>,
    #[serde(default)]
    meta_data: BTreeMap<String, String>,
    #[serde(default, rename = "filter")]
    filters: Vec<MatchFilter>,
}

/// `:name` processes are private to the package.
fn expand_process(package: &PackageName, process: Option<String>) -> Option<String> {
    process.map(|p| {
        if p.starts_with(':') {
            format!("{package}{p}")
        } else {
            p
        }
    })
}

impl ComponentManifest {
    fn into_decl(self, package: &PackageName, kind: ComponentKind) -> PmResult<ComponentDecl> {
        let name = ComponentName::expand(package, &self.name)?;
        // Components with filters are reachable from outside unless stated.
        let exported = self.exported.unwrap_or(!self.filters.is_empty());
        Ok(ComponentDecl {
            name,
            kind,
            filters: self.filters,
            priority: self.priority,
            preferred_order: self.preferred_order,
            is_default: self.is_default,
            enabled: self.enabled.unwrap_or(true),
            exported,
            process: expand_process(package, self.process),
            direct_boot_aware: self.direct_boot_aware,
            authorities: self.authorities,
            meta_data: self.meta_data,
        })
    }
}

impl Manifest {
    fn into_descriptor(self) -> PmResult<PackageDescriptor> {
        let package = PackageName::parse(&self.package)?;
        let mut descriptor = PackageDescriptor::new(package.clone());
        descriptor.version_code = self.version_code;
        descriptor.version_name = self.version_name;
        descriptor.shared_group = self.shared_group.filter(|g| !g.is_empty());
        descriptor.label = self.label;
        if let Some(process) = expand_process(&package, self.process) {
            descriptor.process_name = process;
        }
        descriptor.meta_data = self.meta_data;

        let lists = [
            (ComponentKind::Activity, self.activities),
            (ComponentKind::Service, self.services),
            (ComponentKind::Receiver, self.receivers),
            (ComponentKind::Provider, self.providers),
        ];
        for (kind, entries) in lists {
            for entry in entries {
                descriptor.add_component(entry.into_decl(&package, kind)?);
            }
        }

        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Parses tar-based artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarArtifactParser;

impl TarArtifactParser {
    /// Create a parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactParser for TarArtifactParser {
    fn parse(&self, artifact: &Path) -> PmResult<PackageDescriptor> {
        let mut manifest = None;

        walk_entries(artifact, |path, entry| {
            if path == Path::new(MANIFEST_NAME) {
                let size = entry.header().size().map_err(|e| parse_err(artifact, e))?;
                if size > MAX_MANIFEST_SIZE {
                    return Err(parse_err(
                        artifact,
                        format!("manifest exceeds {MAX_MANIFEST_SIZE} bytes"),
                    ));
                }
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(|e| parse_err(artifact, e))?;
                manifest = Some(text);
            }
            Ok(())
        })?;

        let text = manifest
            .ok_or_else(|| parse_err(artifact, format!("missing {MANIFEST_NAME}")))?;
        let manifest: Manifest = toml::from_str(&text).map_err(|e| parse_err(artifact, e))?;
        let descriptor = manifest.into_descriptor()?;

        debug!(
            artifact = %artifact.display(),
            package = %descriptor.package_name,
            components = descriptor.all_components().count(),
            "Parsed artifact"
        );
        Ok(descriptor)
    }

    fn native_abis(&self, artifact: &Path) -> PmResult<Vec<String>> {
        let mut abis = BTreeSet::new();
        walk_entries(artifact, |path, entry| {
            if entry.header().entry_type().is_file() {
                if let Some((abi, _)) = native_entry(path) {
                    abis.insert(abi);
                }
            }
            Ok(())
        })?;
        Ok(abis.into_iter().collect())
    }

    fn extract_native_code(&self, artifact: &Path, dest: &Path, abis: &[String]) -> PmResult<usize> {
        let available = self.native_abis(artifact)?;
        let Some(abi) = abis.iter().find(|a| available.contains(a)).cloned() else {
            return Ok(0);
        };

        std::fs::create_dir_all(dest).map_err(|e| PmError::io(dest, e))?;
        let mut extracted = 0usize;
        walk_entries(artifact, |path, entry| {
            if !entry.header().entry_type().is_file() {
                return Ok(());
            }
            let Some((entry_abi, rest)) = native_entry(path) else {
                return Ok(());
            };
            if entry_abi != abi {
                return Ok(());
            }
            let target = dest.join(rest);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PmError::io(parent, e))?;
            }
            entry.unpack(&target).map_err(|e| PmError::io(&target, e))?;
            extracted = extracted.saturating_add(1);
            Ok(())
        })?;

        debug!(artifact = %artifact.display(), abi = %abi, files = extracted, "Extracted native code");
        Ok(extracted)
    }
}

fn parse_err(artifact: &Path, message: impl ToString) -> PmError {
    PmError::Parse {
        path: artifact.to_path_buf(),
        message: message.to_string(),
    }
}

/// Open an artifact, transparently decompressing gzip.
fn open_archive(artifact: &Path) -> PmResult<Archive<Box<dyn Read>>> {
    let mut file = File::open(artifact).map_err(|e| PmError::io(artifact, e))?;
    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(PmError::io(artifact, e)),
    };
    file.seek(SeekFrom::Start(0))
        .map_err(|e| PmError::io(artifact, e))?;

    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(Archive::new(reader))
}

/// Visit every entry after validating it. Paths are normalized relative
/// paths with `.` components removed.
fn walk_entries<F>(artifact: &Path, mut visit: F) -> PmResult<()>
where
    F: FnMut(&Path, &mut tar::Entry<'_, Box<dyn Read>>) -> PmResult<()>,
{
    let mut archive = open_archive(artifact)?;
    let mut entry_count = 0usize;
    let mut total_size: u64 = 0;

    for entry_result in archive.entries().map_err(|e| parse_err(artifact, e))? {
        let mut entry = entry_result.map_err(|e| parse_err(artifact, e))?;

        entry_count = entry_count.saturating_add(1);
        if entry_count > MAX_ENTRY_COUNT {
            return Err(parse_err(
                artifact,
                format!("archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"),
            ));
        }

        let entry_type = entry.header().entry_type();
        if !is_safe_entry_type(entry_type) {
            return Err(parse_err(
                artifact,
                format!("unsupported entry type {entry_type:?}"),
            ));
        }

        let size = entry.header().size().map_err(|e| parse_err(artifact, e))?;
        total_size = total_size.saturating_add(size);
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(parse_err(
                artifact,
                format!("archive exceeds maximum extracted size ({MAX_EXTRACTED_SIZE} bytes)"),
            ));
        }

        let raw = entry
            .path()
            .map_err(|e| parse_err(artifact, e))?
            .into_owned();
        let path = normalize_entry_path(&raw)
            .ok_or_else(|| parse_err(artifact, format!("unsafe entry path {}", raw.display())))?;

        visit(&path, &mut entry)?;
    }

    if entry_count == 0 {
        return Err(parse_err(artifact, "archive is empty"));
    }
    Ok(())
}

/// Allows regular files, directories, and metadata headers.
fn is_safe_entry_type(entry_type: tar::EntryType) -> bool {
    matches!(
        entry_type,
        tar::EntryType::Regular
            | tar::EntryType::Directory
            | tar::EntryType::GNULongName
            | tar::EntryType::XHeader
            | tar::EntryType::XGlobalHeader
    )
}

/// Strip `.` components; reject absolute paths and traversal.
fn normalize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Split `lib/<abi>/<rest>` into the ABI and the remaining path.
fn native_entry(path: &Path) -> Option<(String, PathBuf)> {
    let mut components = path.components();
    if components.next()?.as_os_str() != "lib" {
        return None;
    }
    let abi = components.next()?.as_os_str().to_str()?.to_owned();
    let rest: PathBuf = components.collect();
    if rest.as_os_str().is_empty() {
        return None;
    }
    Some((abi, rest))
}

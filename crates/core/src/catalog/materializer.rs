use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{CatalogEntry, LinkStrategy, SkillBundle, SkillCatalog, SkillDescriptor};
use super::descriptor::DESCRIPTOR_FILE;
use crate::config::AppConfig;

/// Prefix reserved for in-flight entries and write checks inside the target directory.
const RESERVED_PREFIX: &str = ".skillbridge-";
/// Marker written inside copied bundles to detect whether the copy is current.
const ORIGIN_MARKER: &str = ".skillbridge-origin";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("skills target directory `{path}` is not writable: {source}")]
    TargetNotWritable { path: PathBuf, source: io::Error },
    #[error("could not remove stale catalog entry `{path}`: {source}")]
    StaleEntry { path: PathBuf, source: io::Error },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    EmptyDirectory,
    MissingDescriptor,
    UnreadableDescriptor(String),
    InvalidDescriptor(String),
    ReservedName,
    LinkFailed(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDirectory => write!(f, "directory is empty"),
            Self::MissingDescriptor => write!(f, "no {DESCRIPTOR_FILE} found"),
            Self::UnreadableDescriptor(detail) => {
                write!(f, "{DESCRIPTOR_FILE} unreadable: {detail}")
            }
            Self::InvalidDescriptor(detail) => write!(f, "{DESCRIPTOR_FILE} invalid: {detail}"),
            Self::ReservedName => {
                write!(f, "names starting with `{RESERVED_PREFIX}` are reserved")
            }
            Self::LinkFailed(detail) => write!(f, "could not link bundle: {detail}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedBundle {
    pub name: String,
    pub reason: SkipReason,
}

/// Result of scanning the source directory without touching the target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceScan {
    pub source_present: bool,
    pub bundles: Vec<SkillBundle>,
    pub skipped: Vec<SkippedBundle>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub source: PathBuf,
    pub target: PathBuf,
    pub strategy: LinkStrategy,
    pub source_present: bool,
    pub linked: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub skipped: Vec<SkippedBundle>,
}

impl MaterializeReport {
    /// True when the run left the target exactly as it found it.
    pub fn is_noop(&self) -> bool {
        self.linked.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Materialized {
    pub catalog: SkillCatalog,
    pub report: MaterializeReport,
}

/// Syncs a source directory of skill bundles into the runtime's skills
/// directory.
#[derive(Clone, Debug)]
pub struct CatalogMaterializer {
    source: PathBuf,
    target: PathBuf,
    strategy: LinkStrategy,
}

impl CatalogMaterializer {
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        strategy: LinkStrategy,
    ) -> Self {
        Self { source: source.into(), target: target.into(), strategy }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.skills.source_directory.clone(),
            config.skills_target_directory(),
            config.skills.strategy,
        )
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn scan(&self) -> SourceScan {
        scan_source(&self.source)
    }

    /// Bring the target directory in sync with the source.
    ///
    /// Entries already pointing at the right bundle are left untouched, so a
    /// second run over an unchanged source performs no writes. New entries are
    /// created under a reserved temporary name and renamed into place.
    pub fn materialize(&self) -> Result<Materialized, CatalogError> {
        info!(
            event_name = "catalog.materialize.start",
            correlation_id = "bootstrap",
            source = %self.source.display(),
            target = %self.target.display(),
            strategy = self.strategy.as_str(),
            "materializing skill catalog"
        );

        ensure_writable(&self.target)?;

        let scan = self.scan();
        let mut skipped = scan.skipped;
        let desired: BTreeMap<String, SkillBundle> =
            scan.bundles.into_iter().map(|bundle| (bundle.name.clone(), bundle)).collect();

        let mut unchanged = Vec::new();
        let mut removed = Vec::new();
        for entry in read_target_entries(&self.target)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();

            if name.starts_with(RESERVED_PREFIX) {
                remove_entry(&path)?;
                continue;
            }

            let current = desired.get(&name).is_some_and(|bundle| self.is_current(&path, bundle));
            if current {
                unchanged.push(name);
            } else {
                remove_entry(&path)?;
                if !desired.contains_key(&name) {
                    debug!(event_name = "catalog.entry.removed", skill = %name, "removed stale entry");
                    removed.push(name);
                }
            }
        }

        let mut linked = Vec::new();
        let mut entries = Vec::new();
        for (name, bundle) in desired {
            let location = self.target.join(&name);
            if !unchanged.contains(&name) {
                if let Err(error) = self.create_entry(&bundle, &location) {
                    warn!(
                        event_name = "catalog.bundle.link_failed",
                        skill = %name,
                        error = %error,
                        "skipping skill bundle"
                    );
                    let reason = SkipReason::LinkFailed(error.to_string());
                    skipped.push(SkippedBundle { name, reason });
                    continue;
                }
                info!(event_name = "catalog.bundle.linked", skill = %name, "linked skill");
                linked.push(name.clone());
            }

            entries.push(CatalogEntry {
                name,
                source: bundle.path,
                location,
                descriptor: bundle.descriptor,
            });
        }

        let catalog = SkillCatalog::new(self.target.clone(), entries);
        let report = MaterializeReport {
            source: self.source.clone(),
            target: self.target.clone(),
            strategy: self.strategy,
            source_present: scan.source_present,
            linked,
            unchanged,
            removed,
            skipped,
        };

        if catalog.is_empty() {
            warn!(
                event_name = "catalog.materialize.empty",
                correlation_id = "bootstrap",
                source = %self.source.display(),
                "no skills found; add skill folders with {DESCRIPTOR_FILE} to the source directory"
            );
        }
        info!(
            event_name = "catalog.materialize.finished",
            correlation_id = "bootstrap",
            skills_count = catalog.len(),
            linked = report.linked.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            "skill catalog materialized"
        );

        Ok(Materialized { catalog, report })
    }

    fn is_current(&self, path: &Path, bundle: &SkillBundle) -> bool {
        let Ok(metadata) = fs::symlink_metadata(path) else {
            return false;
        };

        match self.strategy {
            LinkStrategy::Symlink => {
                metadata.file_type().is_symlink()
                    && fs::read_link(path).is_ok_and(|link| link == bundle.path)
            }
            LinkStrategy::Copy => {
                metadata.is_dir()
                    && fs::read_to_string(path.join(ORIGIN_MARKER))
                        .is_ok_and(|marker| Some(marker) == origin_marker(&bundle.path).ok())
            }
        }
    }

    fn create_entry(&self, bundle: &SkillBundle, location: &Path) -> io::Result<()> {
        let staging = self.target.join(format!("{RESERVED_PREFIX}{}", bundle.name));
        if fs::symlink_metadata(&staging).is_ok() {
            remove_path(&staging)?;
        }

        let staged = match self.strategy {
            LinkStrategy::Symlink => symlink_dir(&bundle.path, &staging),
            LinkStrategy::Copy => copy_dir(&bundle.path, &staging).and_then(|()| {
                fs::write(staging.join(ORIGIN_MARKER), origin_marker(&bundle.path)?)
            }),
        };
        if let Err(error) = staged {
            let _ = remove_path(&staging);
            return Err(error);
        }

        fs::rename(&staging, location).map_err(|error| {
            let _ = remove_path(&staging);
            error
        })
    }
}

/// List bundles in `source`, sorted by name. Never fails: a missing or
/// unreadable source yields an empty scan.
pub fn scan_source(source: &Path) -> SourceScan {
    let read_dir = match fs::read_dir(source) {
        Ok(read_dir) => read_dir,
        Err(error) => {
            warn!(
                event_name = "catalog.source.unavailable",
                correlation_id = "bootstrap",
                source = %source.display(),
                error = %error,
                "skills source directory is not readable; no skills will be loaded"
            );
            return SourceScan::default();
        }
    };

    let mut directories: Vec<PathBuf> = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    directories.sort();

    let mut scan = SourceScan { source_present: true, ..SourceScan::default() };
    for directory in directories {
        let Some(name) = directory.file_name().map(|name| name.to_string_lossy().into_owned())
        else {
            continue;
        };

        let loaded = if name.starts_with(RESERVED_PREFIX) {
            Err(SkipReason::ReservedName)
        } else {
            load_bundle(&directory)
        };
        match loaded {
            Ok(descriptor) => {
                let path = directory.canonicalize().unwrap_or(directory);
                scan.bundles.push(SkillBundle { name, path, descriptor });
            }
            Err(reason) => {
                warn!(
                    event_name = "catalog.bundle.skipped",
                    correlation_id = "bootstrap",
                    skill = %name,
                    reason = %reason,
                    "skipping skill bundle"
                );
                scan.skipped.push(SkippedBundle { name, reason });
            }
        }
    }

    scan
}

fn load_bundle(directory: &Path) -> Result<SkillDescriptor, SkipReason> {
    let descriptor_path = directory.join(DESCRIPTOR_FILE);
    if !descriptor_path.is_file() {
        let empty = fs::read_dir(directory)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        return Err(if empty { SkipReason::EmptyDirectory } else { SkipReason::MissingDescriptor });
    }

    let raw = fs::read_to_string(&descriptor_path)
        .map_err(|error| SkipReason::UnreadableDescriptor(error.to_string()))?;
    SkillDescriptor::parse(&raw).map_err(|error| SkipReason::InvalidDescriptor(error.to_string()))
}

fn ensure_writable(target: &Path) -> Result<(), CatalogError> {
    let not_writable = |source| CatalogError::TargetNotWritable { path: target.to_path_buf(), source };

    fs::create_dir_all(target).map_err(not_writable)?;
    let marker = target.join(format!("{RESERVED_PREFIX}write-check"));
    fs::write(&marker, b"").map_err(not_writable)?;
    fs::remove_file(&marker).map_err(not_writable)
}

fn read_target_entries(target: &Path) -> Result<Vec<fs::DirEntry>, CatalogError> {
    fs::read_dir(target)
        .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
        .map(|mut entries| {
            entries.sort_by_key(fs::DirEntry::file_name);
            entries
        })
        .map_err(|source| CatalogError::TargetNotWritable { path: target.to_path_buf(), source })
}

fn remove_entry(path: &Path) -> Result<(), CatalogError> {
    remove_path(path).map_err(|source| CatalogError::StaleEntry { path: path.to_path_buf(), source })
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        // Symlinks to directories are removed as links on unix; windows needs remove_dir.
        fs::remove_file(path).or_else(|error| {
            if cfg!(windows) && metadata.file_type().is_symlink() {
                fs::remove_dir(path)
            } else {
                Err(error)
            }
        })
    }
}

#[cfg(unix)]
fn symlink_dir(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink_dir(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(original, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_dir(_original: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported on this platform"))
}

fn copy_dir(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Source path plus a listing of every file's relative path, size and mtime.
fn origin_marker(bundle: &Path) -> io::Result<String> {
    let mut lines = Vec::new();
    collect_fingerprint(bundle, bundle, &mut lines)?;
    lines.sort();
    Ok(format!("{}\n{}", bundle.display(), lines.join("\n")))
}

fn collect_fingerprint(root: &Path, directory: &Path, lines: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_fingerprint(root, &path, lines)?;
            continue;
        }
        let metadata = fs::metadata(&path)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|duration| duration.as_nanos())
            .unwrap_or_default();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        lines.push(format!("{}:{}:{}", relative.display(), metadata.len(), modified));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use super::{CatalogMaterializer, SkipReason};
    use crate::catalog::LinkStrategy;

    fn write_skill(source: &Path, name: &str) {
        let dir = source.join(name);
        fs::create_dir_all(dir.join("scripts")).expect("create bundle dir");
        fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: {name}\ndescription: Work with {name} files\n---\n# {name}\n"),
        )
        .expect("write descriptor");
        fs::write(dir.join("scripts").join("run.py"), "print('ok')\n").expect("write script");
    }

    fn layout() -> (TempDir, PathBuf, PathBuf) {
        let root = TempDir::new().expect("tempdir");
        let source = root.path().join("skills");
        let target = root.path().join("app").join(".claude").join("skills");
        fs::create_dir_all(&source).expect("create source");
        (root, source, target)
    }

    fn target_names(target: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(target)
            .expect("read target")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn missing_source_yields_empty_catalog() {
        let root = TempDir::new().expect("tempdir");
        let target = root.path().join(".claude").join("skills");
        let materializer =
            CatalogMaterializer::new(root.path().join("absent"), &target, LinkStrategy::Copy);

        let result = materializer.materialize().expect("materialize should succeed");

        assert!(result.catalog.is_empty());
        assert!(!result.report.source_present);
        assert!(target.is_dir(), "target directory is still created");
    }

    #[test]
    fn invalid_bundles_are_skipped_and_reported() {
        let (_root, source, target) = layout();
        write_skill(&source, "pdf");
        fs::create_dir_all(source.join("empty")).expect("create empty");
        fs::create_dir_all(source.join("notes")).expect("create notes");
        fs::write(source.join("notes").join("README.md"), "no descriptor").expect("write");
        fs::create_dir_all(source.join("broken")).expect("create broken");
        fs::write(source.join("broken").join("SKILL.md"), "no frontmatter").expect("write");
        fs::write(source.join("stray.txt"), "not a bundle").expect("write");

        let result = CatalogMaterializer::new(&source, &target, LinkStrategy::Copy)
            .materialize()
            .expect("materialize should succeed");

        assert_eq!(result.catalog.names().collect::<Vec<_>>(), vec!["pdf"]);
        let reasons: Vec<(&str, &SkipReason)> = result
            .report
            .skipped
            .iter()
            .map(|skipped| (skipped.name.as_str(), &skipped.reason))
            .collect();
        assert_eq!(reasons.len(), 3);
        assert!(reasons.contains(&("empty", &SkipReason::EmptyDirectory)));
        assert!(reasons.contains(&("notes", &SkipReason::MissingDescriptor)));
        assert!(reasons
            .iter()
            .any(|(name, reason)| *name == "broken"
                && matches!(reason, SkipReason::InvalidDescriptor(_))));
        assert_eq!(target_names(&target), vec!["pdf"]);
    }

    #[test]
    fn copy_strategy_is_idempotent_and_prunes_removed_bundles() {
        let (_root, source, target) = layout();
        write_skill(&source, "pdf");
        write_skill(&source, "xlsx");
        let materializer = CatalogMaterializer::new(&source, &target, LinkStrategy::Copy);

        let first = materializer.materialize().expect("first run");
        assert_eq!(first.report.linked, vec!["pdf", "xlsx"]);
        assert!(target.join("pdf").join("scripts").join("run.py").is_file());

        let second = materializer.materialize().expect("second run");
        assert!(second.report.is_noop(), "unchanged source must not rewrite entries");
        assert_eq!(second.report.unchanged, vec!["pdf", "xlsx"]);
        assert_eq!(first.catalog, second.catalog);

        fs::remove_dir_all(source.join("xlsx")).expect("remove bundle");
        let third = materializer.materialize().expect("third run");
        assert_eq!(third.report.removed, vec!["xlsx"]);
        assert_eq!(target_names(&target), vec!["pdf"]);
        assert_eq!(third.catalog.len(), 1);
    }

    #[test]
    fn report_lists_target_entries_in_name_order() {
        let (_root, source, target) = layout();
        for name in ["xlsx", "docx", "pdf", "csv", "pptx"] {
            write_skill(&source, name);
        }
        let materializer = CatalogMaterializer::new(&source, &target, LinkStrategy::Copy);
        materializer.materialize().expect("first run");

        let second = materializer.materialize().expect("second run");
        assert_eq!(second.report.unchanged, vec!["csv", "docx", "pdf", "pptx", "xlsx"]);

        for name in ["xlsx", "csv", "pptx"] {
            fs::remove_dir_all(source.join(name)).expect("remove bundle");
        }
        let third = materializer.materialize().expect("third run");
        assert_eq!(third.report.removed, vec!["csv", "pptx", "xlsx"]);
        assert_eq!(third.report.unchanged, vec!["docx", "pdf"]);
    }

    #[test]
    fn reserved_source_names_are_skipped_and_reruns_stay_noops() {
        let (_root, source, target) = layout();
        write_skill(&source, "pdf");
        write_skill(&source, ".skillbridge-tools");
        let materializer = CatalogMaterializer::new(&source, &target, LinkStrategy::Copy);

        let first = materializer.materialize().expect("first run");
        assert_eq!(first.catalog.names().collect::<Vec<_>>(), vec!["pdf"]);
        assert_eq!(first.report.skipped.len(), 1);
        assert_eq!(first.report.skipped[0].name, ".skillbridge-tools");
        assert_eq!(first.report.skipped[0].reason, SkipReason::ReservedName);

        let second = materializer.materialize().expect("second run");
        assert!(second.report.is_noop(), "reserved bundle must not be relinked on every run");
        assert_eq!(target_names(&target), vec!["pdf"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_strategy_links_bundles_and_is_idempotent() {
        let (_root, source, target) = layout();
        write_skill(&source, "pdf");
        write_skill(&source, "xlsx");
        let materializer = CatalogMaterializer::new(&source, &target, LinkStrategy::Symlink);

        let first = materializer.materialize().expect("first run");
        assert_eq!(first.catalog.len(), 2);
        let link = fs::read_link(target.join("pdf")).expect("pdf should be a symlink");
        assert_eq!(link, source.join("pdf").canonicalize().expect("canonical"));

        let second = materializer.materialize().expect("second run");
        assert!(second.report.is_noop());
        assert_eq!(target_names(&target), vec!["pdf", "xlsx"]);
    }

    #[cfg(unix)]
    #[test]
    fn stale_and_dangling_entries_are_replaced() {
        let (root, source, target) = layout();
        write_skill(&source, "pdf");
        fs::create_dir_all(&target).expect("create target");
        std::os::unix::fs::symlink(root.path().join("gone"), target.join("ghost"))
            .expect("dangling link");
        std::os::unix::fs::symlink(root.path().join("elsewhere"), target.join("pdf"))
            .expect("wrong link");
        fs::create_dir_all(target.join(".skillbridge-pdf")).expect("leftover staging");

        let result = CatalogMaterializer::new(&source, &target, LinkStrategy::Symlink)
            .materialize()
            .expect("materialize should succeed");

        assert_eq!(result.report.removed, vec!["ghost"]);
        assert_eq!(result.report.linked, vec!["pdf"]);
        assert_eq!(target_names(&target), vec!["pdf"]);
        assert!(target.join("pdf").join("SKILL.md").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_target_is_fatal() {
        use std::os::unix::fs::PermissionsExt;

        let (root, source, _) = layout();
        write_skill(&source, "pdf");
        let locked = root.path().join("locked");
        fs::create_dir_all(&locked).expect("create locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).expect("chmod");

        // Privileged users bypass permission bits; nothing to assert there.
        if fs::write(locked.join("marker"), b"").is_ok() {
            return;
        }

        let result = CatalogMaterializer::new(&source, locked.join("skills"), LinkStrategy::Symlink)
            .materialize();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("chmod back");
        let error = result.expect_err("unwritable target must fail");
        assert!(error.to_string().contains("not writable"));
    }
}

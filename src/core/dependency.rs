//! Dependency specs
//!
//! Turns raw manifest entries into typed, validated [`DependencySpec`]s.
//! Creation is pure; pinning registry ranges reads only the already loaded
//! lock file.

use semver::{Op, Version, VersionReq};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defaults::METADATA_DIR;
use crate::core::lock::LockFile;
use crate::core::manifest::RawDependency;
use crate::core::project::Project;
use crate::error::DependencySpecError;
use crate::infra::git::GitRef;

/// Kind of source a dependency is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Version control (git)
    Vcs,
    /// Artifact registry
    Registry,
    /// Local directory
    Path,
}

impl SourceKind {
    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vcs => "vcs",
            Self::Registry => "registry",
            Self::Path => "path",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry version as declared, possibly pinned through the lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryVersion {
    /// Exact version (`1.2.3` or `=1.2.3`)
    Exact(Version),
    /// Range with no pin yet
    Range(VersionReq),
    /// Range pinned to a version recorded in the lock file
    Pinned {
        /// Declared constraint
        req: VersionReq,
        /// Pinned version
        version: Version,
    },
}

impl RegistryVersion {
    /// The concrete version to fetch, if known
    pub fn concrete(&self) -> Option<&Version> {
        match self {
            Self::Exact(version) | Self::Pinned { version, .. } => Some(version),
            Self::Range(_) => None,
        }
    }

    /// The constraint as declared
    pub fn constraint(&self) -> String {
        match self {
            Self::Exact(version) => version.to_string(),
            Self::Range(req) | Self::Pinned { req, .. } => req.to_string(),
        }
    }
}

/// Where a dependency comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Git repository at a ref
    Vcs {
        /// Repository URL
        url: String,
        /// Tag, branch, or rev
        reference: GitRef,
    },
    /// Registry artifact
    Registry {
        /// Registry URL; `None` uses the configured default
        registry: Option<String>,
        /// Version
        version: RegistryVersion,
        /// Expected SHA256 of the artifact
        sha256: Option<String>,
    },
    /// Local directory
    Path {
        /// Absolute directory path
        path: PathBuf,
    },
}

/// A validated dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    /// Dependency name, unique within the project
    pub name: String,
    /// Source
    pub source: Source,
}

impl DependencySpec {
    /// Source kind
    pub fn source_kind(&self) -> SourceKind {
        match self.source {
            Source::Vcs { .. } => SourceKind::Vcs,
            Source::Registry { .. } => SourceKind::Registry,
            Source::Path { .. } => SourceKind::Path,
        }
    }

    /// URL or path the dependency is fetched from
    pub fn source_locator(&self) -> String {
        match &self.source {
            Source::Vcs { url, .. } => url.clone(),
            Source::Registry { registry, .. } => {
                registry.clone().unwrap_or_else(|| "default".to_string())
            }
            Source::Path { path } => path.display().to_string(),
        }
    }

    /// Version constraint as declared (ref, semver constraint, or empty for paths)
    pub fn version_constraint(&self) -> String {
        match &self.source {
            Source::Vcs { reference, .. } => reference.to_string(),
            Source::Registry { version, .. } => version.constraint(),
            Source::Path { .. } => String::new(),
        }
    }

    /// Stable identity of the declared source, independent of the name
    pub fn identity(&self) -> String {
        format!(
            "{}+{}#{}",
            self.source_kind(),
            self.source_locator(),
            self.version_constraint()
        )
    }

    /// Source description recorded in the lock file
    pub fn source_description(&self) -> String {
        match self.source_kind() {
            SourceKind::Vcs => format!("git+{}", self.source_locator()),
            SourceKind::Registry => format!("registry+{}", self.source_locator()),
            SourceKind::Path => format!("path+{}", self.source_locator()),
        }
    }

    /// Version label recorded in the lock file
    pub fn pinned_version_label(&self) -> String {
        match &self.source {
            Source::Vcs { reference, .. } => reference.as_str().to_string(),
            Source::Registry { version, .. } => version.constraint(),
            Source::Path { .. } => "local".to_string(),
        }
    }

    /// Version that keys the cache, when it is known without I/O
    ///
    /// Path sources are keyed by their content hash, which the fetch engine
    /// computes; unpinned registry ranges have no version.
    pub fn pinned_version(&self) -> Option<String> {
        match &self.source {
            Source::Vcs { reference, .. } => Some(reference.as_str().to_string()),
            Source::Registry { version, .. } => version.concrete().map(ToString::to_string),
            Source::Path { .. } => None,
        }
    }

    /// Pin a registry range through the lock file
    pub fn pin(self, lock: Option<&LockFile>) -> Result<Self, DependencySpecError> {
        let Source::Registry {
            registry,
            version: RegistryVersion::Range(req),
            sha256,
        } = self.source
        else {
            return Ok(self);
        };

        match lock.and_then(|lock| lock.pin_for(&self.name, &req)) {
            Some(version) => {
                tracing::debug!(dependency = %self.name, %req, %version, "Pinned from lock file");
                Ok(Self {
                    name: self.name,
                    source: Source::Registry {
                        registry,
                        version: RegistryVersion::Pinned { req, version },
                        sha256,
                    },
                })
            }
            None => Err(DependencySpecError::Unpinned {
                name: self.name,
                constraint: req.to_string(),
            }),
        }
    }
}

fn validate_name(name: &str) -> Result<(), DependencySpecError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(DependencySpecError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn unexpected(name: &str, field: &str, kind: SourceKind) -> DependencySpecError {
    DependencySpecError::UnexpectedField {
        name: name.to_string(),
        field: field.to_string(),
        kind: kind.to_string(),
    }
}

fn parse_registry_version(name: &str, constraint: &str) -> Result<RegistryVersion, DependencySpecError> {
    let constraint = constraint.trim();
    if let Ok(version) = Version::parse(constraint) {
        return Ok(RegistryVersion::Exact(version));
    }

    let req = VersionReq::parse(constraint).map_err(|e| DependencySpecError::InvalidVersion {
        name: name.to_string(),
        constraint: constraint.to_string(),
        error: e.to_string(),
    })?;

    // `=1.2.3` names a single version
    if let [comparator] = req.comparators.as_slice() {
        if let (Op::Exact, Some(minor), Some(patch)) =
            (comparator.op, comparator.minor, comparator.patch)
        {
            return Ok(RegistryVersion::Exact(Version {
                major: comparator.major,
                minor,
                patch,
                pre: comparator.pre.clone(),
                build: semver::BuildMetadata::EMPTY,
            }));
        }
    }

    Ok(RegistryVersion::Range(req))
}

/// Create a validated spec from a raw manifest entry
///
/// Relative paths resolve against the project root, the parent of
/// `metadata_dir`.
pub fn create(raw: &RawDependency, metadata_dir: &Path) -> Result<DependencySpec, DependencySpecError> {
    let name = raw.name.as_str();
    validate_name(name)?;

    let mut sources = Vec::new();
    if raw.git.is_some() {
        sources.push("git".to_string());
    }
    if raw.version.is_some() {
        sources.push("version".to_string());
    }
    if raw.path.is_some() {
        sources.push("path".to_string());
    }
    if sources.len() > 1 {
        return Err(DependencySpecError::ConflictingSources {
            name: name.to_string(),
            sources,
        });
    }

    let git_fields = [
        ("tag", raw.tag.is_some()),
        ("branch", raw.branch.is_some()),
        ("rev", raw.rev.is_some()),
        ("ref", raw.reference.is_some()),
    ];
    let registry_fields = [
        ("registry", raw.registry.is_some()),
        ("sha256", raw.sha256.is_some()),
    ];

    let source = if let Some(url) = &raw.git {
        if let Some((field, _)) = registry_fields.iter().find(|(_, set)| *set) {
            return Err(unexpected(name, field, SourceKind::Vcs));
        }
        if url.trim().is_empty() {
            return Err(DependencySpecError::Malformed {
                name: name.to_string(),
                error: "empty git URL".to_string(),
            });
        }

        let mut refs = Vec::new();
        if let Some(tag) = &raw.tag {
            refs.push(GitRef::Tag(tag.clone()));
        }
        if let Some(branch) = &raw.branch {
            refs.push(GitRef::Branch(branch.clone()));
        }
        if let Some(rev) = &raw.rev {
            refs.push(GitRef::Rev(rev.clone()));
        }
        if let Some(reference) = &raw.reference {
            refs.push(GitRef::Tag(reference.clone()));
        }

        let reference = match refs.len() {
            0 => {
                return Err(DependencySpecError::GitWithoutRef {
                    name: name.to_string(),
                })
            }
            1 => refs.remove(0),
            _ => {
                return Err(DependencySpecError::AmbiguousGitRef {
                    name: name.to_string(),
                })
            }
        };

        Source::Vcs {
            url: url.trim().to_string(),
            reference,
        }
    } else if let Some(constraint) = &raw.version {
        if let Some((field, _)) = git_fields.iter().find(|(_, set)| *set) {
            return Err(unexpected(name, field, SourceKind::Registry));
        }

        Source::Registry {
            registry: raw.registry.as_ref().map(|r| r.trim_end_matches('/').to_string()),
            version: parse_registry_version(name, constraint)?,
            sha256: raw.sha256.as_ref().map(|s| s.trim().to_lowercase()),
        }
    } else if let Some(path) = &raw.path {
        if let Some((field, _)) = git_fields
            .iter()
            .chain(registry_fields.iter())
            .find(|(_, set)| *set)
        {
            return Err(unexpected(name, field, SourceKind::Path));
        }

        let path = PathBuf::from(path);
        let path = if path.is_absolute() {
            path
        } else {
            metadata_dir.parent().unwrap_or(metadata_dir).join(path)
        };
        Source::Path { path }
    } else {
        return Err(DependencySpecError::NoSource {
            name: name.to_string(),
        });
    };

    Ok(DependencySpec {
        name: name.to_string(),
        source,
    })
}

/// Names that collide once mapped to `RAFT_DEP_<NAME>_*` variables
fn normalized_name(name: &str) -> String {
    name.to_ascii_uppercase().replace(['-', '.'], "_")
}

/// Create every spec of a project, in manifest order
///
/// All entries are validated before anything is fetched. Relative paths
/// resolve against the project's source root. Registry ranges are pinned
/// through the project's lock file.
pub fn resolve_all(project: &Project) -> Result<Vec<DependencySpec>, DependencySpecError> {
    let metadata_dir = project.source_root().join(METADATA_DIR);
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut specs = Vec::with_capacity(project.dependencies().len());

    for raw in project.dependencies() {
        let spec = create(raw, &metadata_dir)?;

        if seen.insert(normalized_name(&spec.name), spec.name.clone()).is_some() {
            return Err(DependencySpecError::Duplicate { name: spec.name });
        }

        specs.push(spec.pin(project.lock())?);
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lock::LockedDependency;

    fn raw(name: &str) -> RawDependency {
        RawDependency {
            name: name.to_string(),
            ..RawDependency::default()
        }
    }

    fn metadata_dir() -> PathBuf {
        PathBuf::from("/work/project/.raft")
    }

    #[test]
    fn test_vcs_with_tag() {
        let spec = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                tag: Some("v1.0".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap();

        assert_eq!(spec.source_kind(), SourceKind::Vcs);
        assert_eq!(spec.source_locator(), "https://example.com/a.git");
        assert_eq!(spec.version_constraint(), "tag:v1.0");
        assert_eq!(spec.pinned_version().as_deref(), Some("v1.0"));
    }

    #[test]
    fn test_legacy_ref_is_tag() {
        let spec = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                reference: Some("v2".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap();
        assert_eq!(
            spec.source,
            Source::Vcs {
                url: "https://example.com/a.git".to_string(),
                reference: GitRef::Tag("v2".to_string()),
            }
        );
    }

    #[test]
    fn test_vcs_without_ref() {
        let err = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap_err();
        assert!(matches!(err, DependencySpecError::GitWithoutRef { .. }));
    }

    #[test]
    fn test_vcs_with_two_refs() {
        let err = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                tag: Some("v1".to_string()),
                branch: Some("main".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap_err();
        assert!(matches!(err, DependencySpecError::AmbiguousGitRef { .. }));
    }

    #[test]
    fn test_git_and_path_conflict() {
        let err = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                tag: Some("v1".to_string()),
                path: Some("../a".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap_err();
        match err {
            DependencySpecError::ConflictingSources { sources, .. } => {
                assert_eq!(sources, vec!["git", "path"]);
            }
            e => panic!("Expected ConflictingSources, got: {e:?}"),
        }
    }

    #[test]
    fn test_no_source() {
        let err = create(&raw("a"), &metadata_dir()).unwrap_err();
        assert!(matches!(err, DependencySpecError::NoSource { .. }));
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "-a", "a b", "a/b", ".hidden"] {
            let err = create(
                &RawDependency {
                    version: Some("1.0.0".to_string()),
                    ..raw(name)
                },
                &metadata_dir(),
            )
            .unwrap_err();
            assert!(
                matches!(err, DependencySpecError::InvalidName { .. }),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_registry_exact_versions() {
        for constraint in ["1.2.3", "=1.2.3"] {
            let spec = create(
                &RawDependency {
                    version: Some(constraint.to_string()),
                    ..raw("fmt")
                },
                &metadata_dir(),
            )
            .unwrap();
            assert_eq!(spec.pinned_version().as_deref(), Some("1.2.3"));
        }
    }

    #[test]
    fn test_registry_range_is_unpinned() {
        let spec = create(
            &RawDependency {
                version: Some("^1.2".to_string()),
                registry: Some("https://registry.example.com/".to_string()),
                ..raw("fmt")
            },
            &metadata_dir(),
        )
        .unwrap();
        assert!(spec.pinned_version().is_none());
        assert_eq!(spec.source_locator(), "https://registry.example.com");
    }

    #[test]
    fn test_registry_invalid_version() {
        let err = create(
            &RawDependency {
                version: Some("not a version".to_string()),
                ..raw("fmt")
            },
            &metadata_dir(),
        )
        .unwrap_err();
        assert!(matches!(err, DependencySpecError::InvalidVersion { .. }));
    }

    #[test]
    fn test_registry_rejects_git_fields() {
        let err = create(
            &RawDependency {
                version: Some("1.0.0".to_string()),
                tag: Some("v1".to_string()),
                ..raw("fmt")
            },
            &metadata_dir(),
        )
        .unwrap_err();
        assert!(matches!(err, DependencySpecError::UnexpectedField { .. }));
    }

    #[test]
    fn test_relative_path_resolves_against_project_root() {
        let spec = create(
            &RawDependency {
                path: Some("../shared".to_string()),
                ..raw("shared")
            },
            &metadata_dir(),
        )
        .unwrap();
        assert_eq!(
            spec.source,
            Source::Path {
                path: PathBuf::from("/work/project/../shared")
            }
        );
        assert!(spec.pinned_version().is_none());
    }

    #[test]
    fn test_pin_from_lock() {
        let spec = create(
            &RawDependency {
                version: Some("^1.2".to_string()),
                ..raw("fmt")
            },
            &metadata_dir(),
        )
        .unwrap();

        let mut lock = LockFile::new();
        lock.insert(
            "fmt",
            LockedDependency {
                source: "registry+default".to_string(),
                version: "^1.2".to_string(),
                resolved: "1.4.0".to_string(),
            },
        );

        let pinned = spec.clone().pin(Some(&lock)).unwrap();
        assert_eq!(pinned.pinned_version().as_deref(), Some("1.4.0"));
        assert_eq!(pinned.identity(), spec.identity());

        let err = spec.pin(None).unwrap_err();
        assert!(matches!(err, DependencySpecError::Unpinned { .. }));
    }

    #[test]
    fn test_identity_distinguishes_refs() {
        let a = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                tag: Some("v1".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap();
        let b = create(
            &RawDependency {
                git: Some("https://example.com/a.git".to_string()),
                branch: Some("v1".to_string()),
                ..raw("a")
            },
            &metadata_dir(),
        )
        .unwrap();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_resolve_all_keeps_order_and_rejects_duplicates() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("raft.toml"),
            "[dependencies]\nzeta = \"1.0.0\"\nalpha = { path = \"alpha\" }\n",
        )
        .unwrap();
        let project = Project::load(temp.path()).unwrap();
        let names: Vec<String> = resolve_all(&project)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        std::fs::write(
            temp.path().join("raft.toml"),
            "[dependencies]\nlib-foo = \"1.0.0\"\nlib_foo = \"1.0.0\"\n",
        )
        .unwrap();
        let project = Project::load(temp.path()).unwrap();
        let err = resolve_all(&project).unwrap_err();
        assert_eq!(
            err,
            DependencySpecError::Duplicate {
                name: "lib_foo".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_all_uses_source_root_for_paths() {
        let temp = tempfile::TempDir::new().unwrap();
        let copy = temp.path().join("copy");
        std::fs::create_dir_all(&copy).unwrap();
        std::fs::write(copy.join("raft.toml"), "[dependencies]\nb = { path = \"../b\" }\n").unwrap();
        let original = temp.path().join("libs").join("a");

        let project = Project::load(&copy).unwrap().with_source_root(&original);
        let spec = resolve_all(&project).unwrap().remove(0);
        assert_eq!(
            spec.source,
            Source::Path {
                path: original.join("../b")
            }
        );
        assert_eq!(project.root(), copy);
    }
}

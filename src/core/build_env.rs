//! Build environment setup
//!
//! Environment exported to build rules and hook commands: the target
//! platform, architecture and triple, project locations, and one path and
//! version variable per resolved dependency.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::build_config::BuildSettings;
use crate::core::fetch::ResolvedDependency;
use crate::core::project::Project;
use crate::error::BuildError;

/// A dependency as exposed to the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEnv {
    /// Dependency name
    pub name: String,
    /// Installed artifact directory
    pub path: PathBuf,
    /// Resolved version
    pub version: String,
}

/// Build environment for a project
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEnvironment {
    /// Canonical platform name
    pub platform: String,
    /// Canonical architecture name
    pub arch: String,
    /// Target triple (e.g., "aarch64-unknown-linux-gnu")
    pub target: String,
    /// Project root
    pub project_root: PathBuf,
    /// Project metadata directory
    pub metadata_dir: PathBuf,
    /// Resolved dependencies, in manifest order
    pub dependencies: Vec<DependencyEnv>,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Additional environment variables
    pub extra_env: BTreeMap<String, String>,
}

/// `RAFT_DEP_<NAME>_<suffix>` for a dependency name
pub fn dependency_var(name: &str, suffix: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("RAFT_DEP_{normalized}_{suffix}")
}

impl BuildEnvironment {
    /// Environment for building `project` for `settings` against `resolved`
    ///
    /// The build rule's `env` tables (default, then platform override) are
    /// included as extra variables.
    pub fn for_project(
        project: &Project,
        settings: &BuildSettings,
        resolved: &[ResolvedDependency],
    ) -> Self {
        Self {
            platform: settings.platform().to_string(),
            arch: settings.architecture().to_string(),
            target: settings.target_triple(),
            project_root: project.root().to_path_buf(),
            metadata_dir: project.metadata_dir().to_path_buf(),
            dependencies: resolved
                .iter()
                .map(|dep| DependencyEnv {
                    name: dep.spec.name.clone(),
                    path: dep.install_path.clone(),
                    version: dep.resolved_version.clone(),
                })
                .collect(),
            jobs: num_cpus::get(),
            extra_env: project.build_rule().env_for(settings.platform()),
        }
    }

    /// Set the number of parallel jobs
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Add an extra environment variable
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.insert(key.to_string(), value.to_string());
        self
    }

    /// Convert to environment variable map for process execution
    ///
    /// Extra variables never override the `RAFT_*` variables.
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        let mut env = self.extra_env.clone();

        env.insert("RAFT_PLATFORM".to_string(), self.platform.clone());
        env.insert("RAFT_ARCH".to_string(), self.arch.clone());
        env.insert("RAFT_TARGET".to_string(), self.target.clone());
        env.insert(
            "RAFT_PROJECT_ROOT".to_string(),
            self.project_root.display().to_string(),
        );
        env.insert(
            "RAFT_METADATA_DIR".to_string(),
            self.metadata_dir.display().to_string(),
        );
        env.insert("RAFT_JOBS".to_string(), self.jobs.to_string());
        env.insert(
            "RAFT_DEPENDENCIES".to_string(),
            self.dependencies
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
        );

        for dep in &self.dependencies {
            env.insert(dependency_var(&dep.name, "PATH"), dep.path.display().to_string());
            env.insert(dependency_var(&dep.name, "VERSION"), dep.version.clone());
        }

        env
    }

    /// Check the environment is consistent
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.target.is_empty() {
            return Err(BuildError::Environment(
                "missing required variable RAFT_TARGET".to_string(),
            ));
        }
        if self.jobs == 0 {
            return Err(BuildError::Environment(
                "RAFT_JOBS must be greater than 0".to_string(),
            ));
        }

        let mut seen = BTreeMap::new();
        for dep in &self.dependencies {
            let var = dependency_var(&dep.name, "PATH");
            if let Some(other) = seen.insert(var.clone(), dep.name.as_str()) {
                return Err(BuildError::Environment(format!(
                    "dependencies '{other}' and '{}' both map to {var}",
                    dep.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn environment() -> BuildEnvironment {
        BuildEnvironment {
            platform: "linux".to_string(),
            arch: "x64".to_string(),
            target: "x86_64-unknown-linux-gnu".to_string(),
            project_root: PathBuf::from("/work/app"),
            metadata_dir: PathBuf::from("/work/app/.raft"),
            dependencies: vec![
                DependencyEnv {
                    name: "zlib".to_string(),
                    path: PathBuf::from("/cache/zlib"),
                    version: "0f1e2d".to_string(),
                },
                DependencyEnv {
                    name: "lib-png".to_string(),
                    path: PathBuf::from("/cache/png"),
                    version: "1.6.43".to_string(),
                },
            ],
            jobs: 4,
            extra_env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_env_map_contains_required_variables() {
        let map = environment().to_env_map();

        assert_eq!(map.get("RAFT_PLATFORM").unwrap(), "linux");
        assert_eq!(map.get("RAFT_ARCH").unwrap(), "x64");
        assert_eq!(map.get("RAFT_TARGET").unwrap(), "x86_64-unknown-linux-gnu");
        assert_eq!(map.get("RAFT_PROJECT_ROOT").unwrap(), "/work/app");
        assert_eq!(map.get("RAFT_METADATA_DIR").unwrap(), "/work/app/.raft");
        assert_eq!(map.get("RAFT_JOBS").unwrap(), "4");
        assert_eq!(map.get("RAFT_DEPENDENCIES").unwrap(), "zlib,lib-png");
        assert_eq!(map.get("RAFT_DEP_ZLIB_PATH").unwrap(), "/cache/zlib");
        assert_eq!(map.get("RAFT_DEP_LIB_PNG_VERSION").unwrap(), "1.6.43");
    }

    #[test]
    fn test_extra_env_cannot_override_raft_variables() {
        let map = environment()
            .with_env("RAFT_PLATFORM", "windows")
            .with_env("CFLAGS", "-O2")
            .to_env_map();

        assert_eq!(map.get("RAFT_PLATFORM").unwrap(), "linux");
        assert_eq!(map.get("CFLAGS").unwrap(), "-O2");
    }

    #[test]
    fn test_validation_passes_for_valid_env() {
        assert!(environment().validate().is_ok());
    }

    #[test]
    fn test_validation_fails_for_zero_jobs() {
        let env = environment().with_jobs(0);
        assert!(matches!(env.validate(), Err(BuildError::Environment(_))));
    }

    #[test]
    fn test_validation_fails_for_colliding_names() {
        let mut env = environment();
        env.dependencies.push(DependencyEnv {
            name: "lib.png".to_string(),
            path: PathBuf::from("/cache/other"),
            version: "1".to_string(),
        });
        assert!(env.validate().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_dependency_var_is_a_valid_name(name in "[a-zA-Z0-9][a-zA-Z0-9._-]{0,30}") {
            let var = dependency_var(&name, "PATH");
            prop_assert!(var.starts_with("RAFT_DEP_"));
            prop_assert!(var.ends_with("_PATH"));
            prop_assert!(var.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
        }

        #[test]
        fn prop_extra_env_preserved(key in "[A-Z][A-Z_]{0,9}", value in "[a-zA-Z0-9_]{1,20}") {
            prop_assume!(!key.starts_with("RAFT_"));
            let map = environment().with_env(&key, &value).to_env_map();
            prop_assert_eq!(map.get(&key).unwrap(), &value);
        }
    }
}

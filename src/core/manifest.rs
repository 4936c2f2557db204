//! Manifest (raft.toml) parsing
//!
//! The manifest describes a project: its name, its dependencies (in
//! declaration order), the build rule, and hook commands.
//! Supports environment variable substitution using ${VAR} syntax.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::build_config::Platform;
use crate::error::DependencySpecError;

/// The project manifest (raft.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Project configuration
    #[serde(default)]
    pub project: ProjectConfig,

    /// Dependency entries, in declaration order
    #[serde(default)]
    pub dependencies: toml::Table,

    /// Build rule
    #[serde(default)]
    pub build: BuildRule,

    /// Hook commands
    #[serde(default)]
    pub hooks: HooksConfig,
}

/// Project-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Project name
    #[serde(default = "default_name")]
    pub name: String,

    /// Project version
    #[serde(default = "default_version")]
    pub version: String,

    /// Project description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_name() -> String {
    "unnamed".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            description: None,
        }
    }
}

/// Build rule: a shell command, optionally overridden per platform
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildRule {
    /// Default build command
    #[serde(default)]
    pub command: Option<String>,

    /// Extra environment variables for the build
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-platform overrides, keyed by platform name or alias
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformRule>,
}

/// Platform-specific override of the build rule
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformRule {
    /// Build command for this platform
    #[serde(default)]
    pub command: Option<String>,

    /// Extra environment variables for this platform
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl BuildRule {
    fn platform_rule(&self, platform: Platform) -> Option<&PlatformRule> {
        self.platforms
            .iter()
            .find(|(key, _)| Platform::from_name(key) == Some(platform))
            .map(|(_, rule)| rule)
    }

    /// Build command for a platform, falling back to the default command
    pub fn command_for(&self, platform: Platform) -> Option<&str> {
        self.platform_rule(platform)
            .and_then(|rule| rule.command.as_deref())
            .or(self.command.as_deref())
    }

    /// Environment for a platform; platform entries override defaults
    pub fn env_for(&self, platform: Platform) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(rule) = self.platform_rule(platform) {
            env.extend(rule.env.clone());
        }
        env
    }

    /// Platform keys that do not name a supported platform
    pub fn unknown_platforms(&self) -> Vec<String> {
        self.platforms
            .keys()
            .filter(|key| Platform::from_name(key).is_none())
            .cloned()
            .collect()
    }
}

/// Hook command lists
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HooksConfig {
    /// Commands run in the "beforeBuild" phase, in order
    #[serde(default)]
    pub before_build: Vec<String>,
}

/// A dependency entry as written in the manifest
///
/// Either a table (`{ git = "...", tag = "..." }`) or a bare version string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawDependency {
    /// Dependency name (the manifest key)
    #[serde(skip)]
    pub name: String,

    /// Git repository URL
    #[serde(default)]
    pub git: Option<String>,

    /// Git tag
    #[serde(default)]
    pub tag: Option<String>,

    /// Git branch
    #[serde(default)]
    pub branch: Option<String>,

    /// Git commit
    #[serde(default)]
    pub rev: Option<String>,

    /// Generic git ref, treated as a tag
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,

    /// Registry version constraint
    #[serde(default)]
    pub version: Option<String>,

    /// Registry URL
    #[serde(default)]
    pub registry: Option<String>,

    /// Expected SHA256 of the registry artifact
    #[serde(default)]
    pub sha256: Option<String>,

    /// Local directory
    #[serde(default)]
    pub path: Option<String>,
}

impl RawDependency {
    /// Convert a manifest value into a raw entry
    pub fn from_value(name: &str, value: &toml::Value) -> Result<Self, DependencySpecError> {
        let mut raw = match value {
            toml::Value::String(version) => Self {
                version: Some(version.clone()),
                ..Self::default()
            },
            toml::Value::Table(_) => {
                value
                    .clone()
                    .try_into::<Self>()
                    .map_err(|e| DependencySpecError::Malformed {
                        name: name.to_string(),
                        error: e.to_string(),
                    })?
            }
            other => {
                return Err(DependencySpecError::Malformed {
                    name: name.to_string(),
                    error: format!("expected a table or version string, found {}", other.type_str()),
                })
            }
        };
        raw.name = name.to_string();
        Ok(raw)
    }
}

impl Manifest {
    /// Parse a manifest from TOML, substituting ${VAR} references first
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let substituted = substitute_env_vars_in_toml(content)?;
        toml::from_str(&substituted).map_err(|e| e.to_string())
    }

    /// Raw dependency entries in declaration order
    pub fn raw_dependencies(&self) -> Result<Vec<RawDependency>, DependencySpecError> {
        self.dependencies
            .iter()
            .map(|(name, value)| RawDependency::from_value(name, value))
            .collect()
    }
}

/// Substitute environment variables in a string using ${VAR} syntax.
///
/// Unset variables expand to the empty string.
///
/// # Examples
/// ```
/// use raft::core::manifest::substitute_env_vars;
///
/// std::env::set_var("RAFT_DOC_VAR", "hello");
/// let result = substitute_env_vars("prefix_${RAFT_DOC_VAR}_suffix").unwrap();
/// assert_eq!(result, "prefix_hello_suffix");
/// std::env::remove_var("RAFT_DOC_VAR");
/// ```
pub fn substitute_env_vars(input: &str) -> Result<String, String> {
    let re =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| format!("Invalid regex: {e}"))?;

    let mut last_end = 0;
    let mut output = String::new();

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        output.push_str(&input[last_end..full_match.start()]);
        output.push_str(&std::env::var(var_name).unwrap_or_default());
        last_end = full_match.end();
    }

    output.push_str(&input[last_end..]);

    Ok(output)
}

/// Substitute environment variables in all string values of a TOML document
fn substitute_env_vars_in_toml(content: &str) -> Result<String, String> {
    let mut value: toml::Value =
        toml::from_str(content).map_err(|e| format!("Failed to parse TOML: {e}"))?;

    substitute_in_value(&mut value)?;

    toml::to_string(&value).map_err(|e| format!("Failed to serialize TOML: {e}"))
}

fn substitute_in_value(value: &mut toml::Value) -> Result<(), String> {
    match value {
        toml::Value::String(s) => {
            *s = substitute_env_vars(s)?;
        }
        toml::Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_in_value(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, v) in table.iter_mut() {
                substitute_in_value(v)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
[project]
name = "demo"
version = "1.0.0"

[dependencies]
zlib = { git = "https://example.com/zlib.git", tag = "v1.3" }
fmt = "10.2.1"
local = { path = "../local" }
aaa = { version = "1.0.0", registry = "https://mirror.example.com" }

[build]
command = "make"

[build.env]
OPT = "2"

[build.platforms.win32]
command = "nmake"

[build.platforms.windows.env]
OPT = "1"

[hooks]
before_build = ["./gen.sh", "echo done"]
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        assert_eq!(manifest.project.name, "demo");
        assert_eq!(manifest.hooks.before_build, vec!["./gen.sh", "echo done"]);
    }

    #[test]
    fn test_dependencies_keep_declaration_order() {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        let names: Vec<String> = manifest
            .raw_dependencies()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["zlib", "fmt", "local", "aaa"]);
    }

    #[test]
    fn test_version_string_shorthand() {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        let deps = manifest.raw_dependencies().unwrap();
        assert_eq!(deps[1].version.as_deref(), Some("10.2.1"));
        assert!(deps[1].git.is_none());
    }

    #[test]
    fn test_platform_command_override() {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        assert_eq!(manifest.build.command_for(Platform::Linux), Some("make"));
        assert_eq!(manifest.build.command_for(Platform::Windows), Some("nmake"));
    }

    #[test]
    fn test_platform_env_override() {
        let manifest = Manifest::from_toml(MANIFEST).unwrap();
        assert_eq!(
            manifest.build.env_for(Platform::Linux).get("OPT").map(String::as_str),
            Some("2")
        );
    }

    #[test]
    fn test_unknown_platform_keys() {
        let manifest = Manifest::from_toml(
            "[project]\nname = \"x\"\n[build.platforms.beos]\ncommand = \"make\"\n",
        )
        .unwrap();
        assert_eq!(manifest.build.unknown_platforms(), vec!["beos"]);
    }

    #[test]
    fn test_unknown_dependency_field_is_malformed() {
        let manifest =
            Manifest::from_toml("[dependencies]\nfoo = { gti = \"https://x\" }\n").unwrap();
        let err = manifest.raw_dependencies().unwrap_err();
        assert!(matches!(err, DependencySpecError::Malformed { .. }));
    }

    #[test]
    fn test_non_table_dependency_is_malformed() {
        let manifest = Manifest::from_toml("[dependencies]\nfoo = 3\n").unwrap();
        let err = manifest.raw_dependencies().unwrap_err();
        match err {
            DependencySpecError::Malformed { name, error } => {
                assert_eq!(name, "foo");
                assert!(error.contains("integer"));
            }
            e => panic!("Expected Malformed, got: {e:?}"),
        }
    }

    #[test]
    fn test_env_substitution_in_manifest() {
        std::env::set_var("RAFT_TEST_MANIFEST_TAG", "v9");
        let manifest = Manifest::from_toml(
            "[dependencies]\na = { git = \"https://x/a.git\", tag = \"${RAFT_TEST_MANIFEST_TAG}\" }\n",
        )
        .unwrap();
        std::env::remove_var("RAFT_TEST_MANIFEST_TAG");

        let deps = manifest.raw_dependencies().unwrap();
        assert_eq!(deps[0].tag.as_deref(), Some("v9"));
    }

    #[test]
    fn test_substitute_missing_var_is_empty() {
        let result = substitute_env_vars("a${RAFT_SURELY_UNSET_VARIABLE}b").unwrap();
        assert_eq!(result, "ab");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Manifest::from_toml("[project\nname=").is_err());
    }
}

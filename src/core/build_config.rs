//! Build configuration resolution
//!
//! Normalizes user-supplied (or host-inferred) platform and architecture
//! names into immutable [`BuildSettings`]. Value-equal settings always map
//! to the same cache partition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Target operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux
    Linux,
    /// macOS
    Macos,
    /// Windows
    Windows,
    /// Android
    Android,
    /// iOS
    Ios,
}

impl Platform {
    /// All supported platforms
    pub const ALL: [Platform; 5] = [
        Self::Linux,
        Self::Macos,
        Self::Windows,
        Self::Android,
        Self::Ios,
    ];

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }

    /// Look up a platform by canonical name or alias (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "linux" => Some(Self::Linux),
            "macos" | "darwin" | "osx" | "mac" => Some(Self::Macos),
            "windows" | "win32" | "win" => Some(Self::Windows),
            "android" => Some(Self::Android),
            "ios" => Some(Self::Ios),
            _ => None,
        }
    }

    /// Infer the platform from a `std::env::consts::OS` value
    pub fn from_host_os(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Macos),
            "windows" => Some(Self::Windows),
            "android" => Some(Self::Android),
            "ios" => Some(Self::Ios),
            _ => None,
        }
    }

    fn supported() -> String {
        Self::ALL.map(Self::as_str).join(", ")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ConfigError::UnsupportedPlatform {
            value: s.to_string(),
            supported: Self::supported(),
        })
    }
}

/// Target CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// 64-bit x86
    X64,
    /// 32-bit x86
    X86,
    /// 64-bit ARM
    Arm64,
    /// 32-bit ARM
    Arm,
}

impl Architecture {
    /// All supported architectures
    pub const ALL: [Architecture; 4] = [Self::X64, Self::X86, Self::Arm64, Self::Arm];

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
        }
    }

    /// Look up an architecture by canonical name or alias (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "x64" | "x86_64" | "amd64" => Some(Self::X64),
            "x86" | "i386" | "i686" | "ia32" => Some(Self::X86),
            "arm64" | "aarch64" => Some(Self::Arm64),
            "arm" | "armv7" => Some(Self::Arm),
            _ => None,
        }
    }

    /// Infer the architecture from a `std::env::consts::ARCH` value
    pub fn from_host_arch(arch: &str) -> Option<Self> {
        match arch {
            "x86_64" => Some(Self::X64),
            "x86" => Some(Self::X86),
            "aarch64" => Some(Self::Arm64),
            "arm" => Some(Self::Arm),
            _ => None,
        }
    }

    /// Architecture component of a target triple
    fn triple_arch(self) -> &'static str {
        match self {
            Self::X64 => "x86_64",
            Self::X86 => "i686",
            Self::Arm64 => "aarch64",
            Self::Arm => "armv7",
        }
    }

    fn supported() -> String {
        Self::ALL.map(Self::as_str).join(", ")
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ConfigError::UnsupportedArchitecture {
            value: s.to_string(),
            supported: Self::supported(),
        })
    }
}

/// Normalized platform/architecture pair driving resolution and the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildSettings {
    platform: Platform,
    architecture: Architecture,
}

impl BuildSettings {
    /// Create settings from already-normalized values
    pub fn new(platform: Platform, architecture: Architecture) -> Self {
        Self {
            platform,
            architecture,
        }
    }

    /// Target platform
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Target architecture
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Whether these settings describe the machine raft is running on
    pub fn is_host(&self) -> bool {
        Platform::from_host_os(std::env::consts::OS) == Some(self.platform)
            && Architecture::from_host_arch(std::env::consts::ARCH) == Some(self.architecture)
    }

    /// Conventional target triple for these settings
    pub fn target_triple(&self) -> String {
        let arch = self.architecture.triple_arch();
        let rest = match (self.platform, self.architecture) {
            (Platform::Linux, Architecture::Arm) => "unknown-linux-gnueabihf",
            (Platform::Linux, _) => "unknown-linux-gnu",
            (Platform::Macos, _) => "apple-darwin",
            (Platform::Windows, _) => "pc-windows-msvc",
            (Platform::Android, Architecture::Arm) => "linux-androideabi",
            (Platform::Android, _) => "linux-android",
            (Platform::Ios, _) => "apple-ios",
        };
        format!("{arch}-{rest}")
    }

    /// Relative cache partition (`<platform>/<arch>`)
    pub fn partition(&self) -> PathBuf {
        PathBuf::from(self.platform.as_str()).join(self.architecture.as_str())
    }
}

impl fmt::Display for BuildSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.architecture)
    }
}

/// Resolve build settings from optional user input
///
/// Omitted values are inferred from the host. Fails when an explicit value is
/// outside the supported set or the host cannot be mapped.
pub fn parse(
    platform: Option<&str>,
    architecture: Option<&str>,
) -> Result<BuildSettings, ConfigError> {
    parse_with_host(
        platform,
        architecture,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

/// Resolve build settings against an explicit host description
pub fn parse_with_host(
    platform: Option<&str>,
    architecture: Option<&str>,
    host_os: &str,
    host_arch: &str,
) -> Result<BuildSettings, ConfigError> {
    let platform = match platform {
        Some(name) => name.parse()?,
        None => Platform::from_host_os(host_os).ok_or_else(|| {
            ConfigError::UnsupportedPlatform {
                value: host_os.to_string(),
                supported: Platform::supported(),
            }
        })?,
    };

    let architecture = match architecture {
        Some(name) => name.parse()?,
        None => Architecture::from_host_arch(host_arch).ok_or_else(|| {
            ConfigError::UnsupportedArchitecture {
                value: host_arch.to_string(),
                supported: Architecture::supported(),
            }
        })?,
    };

    Ok(BuildSettings::new(platform, architecture))
}

//! Package specs with optional version constraints.

use super::PackageManager;
use anyhow::{bail, Result};
use std::fmt;

/// Version constraint attached to a package name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Whatever the package index currently serves.
    Any,
    /// Exact pin (`name=ver` or `name==ver`).
    Exact(String),
    /// Minimum version (`name>=ver`).
    AtLeast(String),
}

/// A package name plus constraint, as written in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl PackageSpec {
    /// Parse `name`, `name=ver`, `name==ver` or `name>=ver`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (name, constraint) = if let Some((name, ver)) = raw.split_once(">=") {
            (name, VersionConstraint::AtLeast(ver.trim().to_string()))
        } else if let Some((name, ver)) = raw.split_once("==") {
            (name, VersionConstraint::Exact(ver.trim().to_string()))
        } else if let Some((name, ver)) = raw.split_once('=') {
            (name, VersionConstraint::Exact(ver.trim().to_string()))
        } else {
            (raw, VersionConstraint::Any)
        };

        let name = name.trim();
        if name.is_empty() {
            bail!("package spec '{}' has an empty name", raw);
        }
        if name.chars().any(|c| c.is_whitespace() || "<>=!~".contains(c)) {
            bail!("package spec '{}' has an invalid name '{}'", raw, name);
        }
        if let VersionConstraint::Exact(ver) | VersionConstraint::AtLeast(ver) = &constraint {
            if ver.is_empty() {
                bail!("package spec '{}' has an empty version", raw);
            }
        }

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }

    /// Render the argument the given package manager expects.
    pub fn render_for(&self, manager: PackageManager) -> Result<String> {
        match (manager, &self.constraint) {
            (_, VersionConstraint::Any) => Ok(self.name.clone()),
            (PackageManager::Apt, VersionConstraint::Exact(ver)) => {
                Ok(format!("{}={}", self.name, ver))
            }
            (PackageManager::Apt, VersionConstraint::AtLeast(_)) => bail!(
                "apt cannot express a minimum version for '{}'; pin it exactly with '{}=<version>'",
                self.name,
                self.name
            ),
            (PackageManager::Pip, VersionConstraint::Exact(ver)) => {
                Ok(format!("{}=={}", self.name, ver))
            }
            (PackageManager::Pip, VersionConstraint::AtLeast(ver)) => {
                Ok(format!("{}>={}", self.name, ver))
            }
        }
    }

    /// True when the installed version may differ between runs.
    pub fn is_floating(&self) -> bool {
        !matches!(self.constraint, VersionConstraint::Exact(_))
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            VersionConstraint::Any => write!(f, "{}", self.name),
            VersionConstraint::Exact(ver) => write!(f, "{}=={}", self.name, ver),
            VersionConstraint::AtLeast(ver) => write!(f, "{}>={}", self.name, ver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimum_constraint() {
        let spec = PackageSpec::parse("west>=1.2.0").unwrap();
        assert_eq!(spec.name, "west");
        assert_eq!(spec.constraint, VersionConstraint::AtLeast("1.2.0".into()));
        assert!(spec.is_floating());
        assert_eq!(spec.render_for(PackageManager::Pip).unwrap(), "west>=1.2.0");
    }

    #[test]
    fn apt_pin_uses_single_equals() {
        let spec = PackageSpec::parse("ninja-build==1.10.1-1").unwrap();
        assert_eq!(
            spec.render_for(PackageManager::Apt).unwrap(),
            "ninja-build=1.10.1-1"
        );
        assert_eq!(
            spec.render_for(PackageManager::Pip).unwrap(),
            "ninja-build==1.10.1-1"
        );
        assert!(!spec.is_floating());
    }

    #[test]
    fn bare_name_has_no_constraint() {
        let spec = PackageSpec::parse("  git ").unwrap();
        assert_eq!(spec.name, "git");
        assert_eq!(spec.constraint, VersionConstraint::Any);
        assert_eq!(spec.render_for(PackageManager::Apt).unwrap(), "git");
    }

    #[test]
    fn rejects_empty_name_and_version() {
        assert!(PackageSpec::parse(">=1.0").is_err());
        assert!(PackageSpec::parse("west>=").is_err());
        assert!(PackageSpec::parse("").is_err());
    }

    #[test]
    fn rejects_unsupported_operators() {
        assert!(PackageSpec::parse("west<=1.0").is_err());
        assert!(PackageSpec::parse("west~=1.0").is_err());
    }
}

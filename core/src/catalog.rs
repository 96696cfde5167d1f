//! Static capability catalogs.
//!
//! Two TOML catalogs ship with the crate: `capabilities.toml` maps binary
//! names to the planning predicates describing what those binaries can do for
//! an attacker; `CVE_capabilities.toml` additionally carries version globs
//! and runtime preconditions for binaries with known vulnerabilities.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::encoder::normalize;
use crate::error::MicronixErr;
use crate::error::Result;

const CAPABILITIES_TOML: &str = include_str!("../resources/capabilities.toml");
const CVE_CAPABILITIES_TOML: &str = include_str!("../resources/CVE_capabilities.toml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CapabilityDoc {
    capabilities: BTreeMap<String, RawCapability>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCapability {
    predicates: Vec<String>,
    binaries: Vec<RawCapabilityBinary>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCapabilityBinary {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CveDoc {
    capabilities: BTreeMap<String, RawCve>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCve {
    predicates: Vec<String>,
    binaries: Vec<RawCveBinary>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCveBinary {
    name: String,
    version_command: String,
    version: Vec<String>,
    #[serde(default)]
    dependencies: CveDependencies,
}

/// Preconditions that must hold on the target before a CVE predicate is
/// attached to a binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CveDependencies {
    /// `find` expressions that must match at least one file.
    #[serde(default)]
    pub files: Vec<String>,
    /// Substrings that must appear in the path of some known executable.
    #[serde(default)]
    pub executables: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<CveCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CveCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub op1: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// `op1` is run on the target and must produce output.
    NotEmpty,
    /// A probe file is touched in the working directory and the outcome of
    /// the probe decides the condition.
    UserCanCreateFile,
}

/// One vulnerable-binary entry flattened out of the CVE catalog. The CVE
/// predicate is the first predicate of the owning entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CveBinarySpec {
    pub name: String,
    pub version_command: String,
    pub version_globs: Vec<String>,
    pub dependencies: CveDependencies,
    pub cve_predicate: String,
}

/// A named capability with the predicates it grants and the binaries that
/// grant it.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityEntry {
    pub predicates: Vec<String>,
    pub binaries: Vec<String>,
}

/// The `capabilities.toml` catalog.
#[derive(Debug, Clone)]
pub struct CapabilityCatalog {
    capabilities: BTreeMap<String, CapabilityEntry>,
}

impl CapabilityCatalog {
    /// The catalog embedded in the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(CAPABILITIES_TOML)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|_| {
            MicronixErr::Catalog(format!(
                "capabilities catalog {} does not exist",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let doc: CapabilityDoc = toml::from_str(raw)?;

        let capabilities = doc
            .capabilities
            .into_iter()
            .map(|(name, entry)| {
                let entry = CapabilityEntry {
                    predicates: entry.predicates,
                    binaries: entry.binaries.into_iter().map(|b| b.name).collect(),
                };
                (name, entry)
            })
            .collect();

        Ok(Self { capabilities })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CapabilityEntry)> {
        self.capabilities.iter()
    }

    /// Map `capability → predicate` for a binary basename. Name comparison
    /// happens on normalized symbols, the same way the encoder emits them.
    pub fn capabilities_for_binary(&self, basename: &str) -> BTreeMap<String, String> {
        let basename = normalize(basename);
        let mut res = BTreeMap::new();

        for (capability, entry) in &self.capabilities {
            if !entry.binaries.iter().any(|b| normalize(b) == basename) {
                continue;
            }

            for predicate in &entry.predicates {
                res.insert(capability.clone(), predicate.clone());
            }
        }

        res
    }

    /// All binaries whose capability entry grants `predicate`.
    pub fn binaries_for_predicate(&self, predicate: &str) -> Vec<String> {
        let mut res = Vec::new();

        for entry in self.capabilities.values() {
            if entry.predicates.iter().any(|p| p == predicate) {
                res.extend(entry.binaries.iter().cloned());
            }
        }

        res
    }
}

/// The `CVE_capabilities.toml` catalog, flattened to one entry per
/// vulnerable binary.
#[derive(Debug, Clone, Default)]
pub struct CveCatalog {
    pub binaries: Vec<CveBinarySpec>,
}

impl CveCatalog {
    /// The catalog embedded in the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(CVE_CAPABILITIES_TOML)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|_| {
            MicronixErr::Catalog(format!("CVE catalog {} does not exist", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let doc: CveDoc = toml::from_str(raw)?;
        let mut binaries = Vec::new();

        for (cve, entry) in doc.capabilities {
            let Some(cve_predicate) = entry.predicates.first() else {
                return Err(MicronixErr::Catalog(format!(
                    "CVE entry {cve} declares no predicates"
                )));
            };

            for binary in entry.binaries {
                binaries.push(CveBinarySpec {
                    name: binary.name,
                    version_command: binary.version_command,
                    version_globs: binary.version,
                    dependencies: binary.dependencies,
                    cve_predicate: cve_predicate.clone(),
                });
            }
        }

        Ok(Self { binaries })
    }
}

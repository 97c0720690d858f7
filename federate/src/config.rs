//! Load federate configuration files and federation manifests.
//!
//! A federate configuration enumerates the federate's name, publications, and subscriptions. It can
//! be written in JSON (`.json`) or YAML (`.yaml`, `.yml`); keys not listed here (core type, broker
//! settings, ...) are ignored.
//!
//! ```yaml
//! name: sender
//! publications:
//!   - key: temp
//!     type: string
//! subscriptions:
//!   - key: echo/temp
//!     required: true
//! ```

use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Separator between a federate name and a non-global publication key.
pub const NAMESPACE_SEPARATOR: char = '/';

fn default_type() -> String {
    "string".to_string()
}

/// A publication declared by a federate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub key: String,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// If false, the publication is visible federation-wide as `<federate>/<key>`.
    #[serde(default)]
    pub global: bool,
}

/// A subscription declared by a federate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub key: String,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// If true, entering initializing mode fails when no federate publishes `key`.
    #[serde(default)]
    pub required: bool,
}

/// Configuration of a single federate.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Federate {
    pub name: String,
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl Federate {
    /// Returns the federation-wide name of the publication `key`.
    ///
    /// Keys that are not declared in the configuration are treated as non-global.
    pub fn qualify(&self, key: &str) -> String {
        let global = self
            .publications
            .iter()
            .any(|publication| publication.key == key && publication.global);
        if global {
            key.to_string()
        } else {
            format!("{}{}{}", self.name, NAMESPACE_SEPARATOR, key)
        }
    }

    fn validate(self) -> Result<Self, Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("federate name is empty".into()));
        }
        if self.name.contains(NAMESPACE_SEPARATOR) {
            return Err(Error::InvalidConfig(format!(
                "federate name must not contain '{}': {}",
                NAMESPACE_SEPARATOR, self.name
            )));
        }
        Ok(self)
    }
}

/// Supported configuration encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Ok(Self::Yaml)
            }
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Parse a federate configuration from `content`.
pub fn parse(content: &str, format: Format) -> Result<Federate, Error> {
    let federate: Federate = match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Yaml => serde_yaml::from_str(content)?,
    };
    federate.validate()
}

/// Load a federate configuration from `path`.
pub fn load(path: &Path) -> Result<Federate, Error> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    parse(&content, format)
}

/// Role of a federate in a manifest.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Relay,
    Producer,
}

/// One federate started by the `federation` runner.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Member {
    /// Path to the federate configuration, relative to the manifest.
    pub config: PathBuf,
    pub role: Kind,
    pub stop_time: f64,
    pub delta_time: f64,
    #[serde(default)]
    pub message_size: usize,
    #[serde(default)]
    pub log_time: bool,
}

/// A set of federates run together against one simulated federation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Manifest {
    /// Seconds to wait on any blocking federation call.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Seed for producer payloads (each federate derives its own stream).
    #[serde(default)]
    pub seed: Option<u64>,
    pub federates: Vec<Member>,
}

impl Manifest {
    /// Load a manifest from `path`, resolving member configuration paths against its directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let mut manifest: Manifest = serde_yaml::from_str(&content)?;
        if manifest.federates.is_empty() {
            return Err(Error::InvalidConfig("manifest lists no federates".into()));
        }
        if let Some(timeout) = manifest.timeout {
            if !timeout.is_finite() || timeout <= 0.0 {
                return Err(Error::InvalidConfig(format!("invalid timeout: {timeout}")));
            }
        }
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for member in manifest.federates.iter_mut() {
            if member.config.is_relative() {
                member.config = base.join(&member.config);
            }
        }
        Ok(manifest)
    }
}

//! Record model: one package or one configuration option of a channel.
//!
//! Records are built once by the feed loader and never mutated afterwards.
//! Indexing and ranking both read them through [`Record::search_fields`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Discriminates the two record variants; also used as a query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Package,
    Option,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Package => "package",
            RecordKind::Option => "option",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "package" | "packages" => Ok(RecordKind::Package),
            "option" | "options" => Ok(RecordKind::Option),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// License descriptor as found in package metadata.
///
/// Feeds carry either a bare string or an attribute set with some of the
/// fields below.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum License {
    Verbatim(String),
    #[serde(rename_all = "camelCase")]
    Structured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        short_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spdx_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        free: Option<bool>,
    },
}

impl License {
    /// Human readable label, falling back from full name to short name,
    /// SPDX id and URL.
    pub fn label(&self) -> &str {
        match self {
            License::Verbatim(s) => s,
            License::Structured {
                full_name,
                short_name,
                spdx_id,
                url,
                ..
            } => full_name
                .as_deref()
                .or(short_name.as_deref())
                .or(spdx_id.as_deref())
                .or(url.as_deref())
                .unwrap_or("unknown"),
        }
    }
}

/// A package, identified by its attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub attribute_path: String,
    pub name: String,
    /// May be empty; many packages carry no version.
    pub version: String,
    pub outputs: Vec<String>,
    pub default_output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub homepages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<License>,
}

/// A configuration option, identified by its dotted path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRecord {
    pub path: String,
    pub option_type: String,
    /// Default value rendered as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Free text, may contain markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declarations: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// One searchable item of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Package(PackageRecord),
    Option(OptionRecord),
}

/// The text fields of a record that participate in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchFields<'a> {
    pub identity: &'a str,
    /// Display name when it differs from the identity.
    pub name: Option<&'a str>,
    /// Only packages contribute their description.
    pub description: Option<&'a str>,
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Package(_) => RecordKind::Package,
            Record::Option(_) => RecordKind::Option,
        }
    }

    /// Attribute path for packages, option path for options.
    pub fn identity(&self) -> &str {
        match self {
            Record::Package(p) => &p.attribute_path,
            Record::Option(o) => &o.path,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Record::Package(p) => &p.name,
            Record::Option(o) => &o.path,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Record::Package(p) => p.description.as_deref(),
            Record::Option(o) => o.description.as_deref(),
        }
    }

    pub fn search_fields(&self) -> SearchFields<'_> {
        match self {
            Record::Package(p) => SearchFields {
                identity: &p.attribute_path,
                name: (p.name != p.attribute_path && !p.name.is_empty()).then_some(p.name.as_str()),
                description: p.description.as_deref().filter(|d| !d.is_empty()),
            },
            Record::Option(o) => SearchFields {
                identity: &o.path,
                name: None,
                description: None,
            },
        }
    }

    pub fn as_package(&self) -> Option<&PackageRecord> {
        match self {
            Record::Package(p) => Some(p),
            Record::Option(_) => None,
        }
    }

    pub fn as_option(&self) -> Option<&OptionRecord> {
        match self {
            Record::Option(o) => Some(o),
            Record::Package(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(path: &str, name: &str, description: Option<&str>) -> Record {
        Record::Package(PackageRecord {
            attribute_path: path.to_string(),
            name: name.to_string(),
            version: "1.0".to_string(),
            outputs: vec!["out".to_string()],
            default_output: "out".to_string(),
            homepages: vec![],
            description: description.map(str::to_string),
            long_description: None,
            licenses: vec![],
        })
    }

    #[test]
    fn test_record_kind_parse() {
        assert_eq!("package".parse::<RecordKind>().unwrap(), RecordKind::Package);
        assert_eq!("Options".parse::<RecordKind>().unwrap(), RecordKind::Option);
        assert!("service".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_package_search_fields() {
        let record = package("python3Packages.requests", "python3.11-requests", Some("HTTP"));
        let fields = record.search_fields();
        assert_eq!(fields.identity, "python3Packages.requests");
        assert_eq!(fields.name, Some("python3.11-requests"));
        assert_eq!(fields.description, Some("HTTP"));
    }

    #[test]
    fn test_package_name_equal_to_path_is_not_repeated() {
        let record = package("nginx", "nginx", None);
        let fields = record.search_fields();
        assert_eq!(fields.name, None);
        assert_eq!(fields.description, None);
    }

    #[test]
    fn test_option_search_fields_ignore_description() {
        let record = Record::Option(OptionRecord {
            path: "services.nginx.enable".to_string(),
            option_type: "boolean".to_string(),
            default: Some("false".to_string()),
            description: Some("Whether to enable *nginx*.".to_string()),
            example: None,
            declarations: vec![],
            read_only: false,
        });
        assert_eq!(record.kind(), RecordKind::Option);
        assert_eq!(record.display_name(), "services.nginx.enable");
        assert_eq!(record.search_fields().description, None);
        assert_eq!(record.description(), Some("Whether to enable *nginx*."));
    }

    #[test]
    fn test_license_label_fallbacks() {
        let verbatim = License::Verbatim("MIT".to_string());
        assert_eq!(verbatim.label(), "MIT");

        let structured: License =
            serde_json::from_str(r#"{"shortName": "bsd3", "spdxId": "BSD-3-Clause"}"#).unwrap();
        assert_eq!(structured.label(), "bsd3");

        let empty: License = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.label(), "unknown");
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let json = serde_json::to_value(package("nginx", "nginx", None)).unwrap();
        assert_eq!(json["kind"], "package");
        assert_eq!(json["attribute_path"], "nginx");
    }
}

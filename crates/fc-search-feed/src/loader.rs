//! Feed loader: raw documents to validated records.
//!
//! Validation is per entry. A bad entry is skipped with a [`SkipReason`] and
//! the rest of the document still loads; only a document that cannot be
//! parsed at its top level fails the load.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use fc_search_types::{License, OptionRecord, PackageRecord, Record, Revisions};

use crate::entries::{self, type_name, RawDocument};
use crate::error::{Document, FeedError};
use crate::source::RawFeed;

/// Why an entry was left out of the record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    MissingIdentity,
    MalformedEntry(String),
    /// A previous entry of the same document had this identity.
    DuplicateIdentity,
}

/// One skipped entry, with enough context to find it in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub document: Document,
    /// Zero-based position of the entry in its document.
    pub position: usize,
    pub identity: Option<String>,
    pub reason: SkipReason,
}

/// Skip totals per reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub missing_identity: usize,
    pub malformed: usize,
    pub duplicate: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.missing_identity + self.malformed + self.duplicate
    }
}

/// Output of a successful feed load.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub records: Vec<Record>,
    pub skipped: Vec<SkippedEntry>,
    pub revisions: Revisions,
}

impl LoadResult {
    pub fn skip_counts(&self) -> SkipCounts {
        let mut counts = SkipCounts::default();
        for entry in &self.skipped {
            match entry.reason {
                SkipReason::MissingIdentity => counts.missing_identity += 1,
                SkipReason::MalformedEntry(_) => counts.malformed += 1,
                SkipReason::DuplicateIdentity => counts.duplicate += 1,
            }
        }
        counts
    }
}

/// Load both documents of a feed.
///
/// # Errors
///
/// Returns `FeedError::Unparsable` if either document fails to parse at the
/// top level. Entry-level problems are reported in `LoadResult::skipped`.
pub fn load_feed(raw: &RawFeed) -> Result<LoadResult, FeedError> {
    let (mut records, mut skipped) = load_options(&raw.options)?;
    let (packages, package_skips) = load_packages(&raw.packages)?;
    records.extend(packages);
    skipped.extend(package_skips);

    let result = LoadResult {
        records,
        skipped,
        revisions: raw.revisions.clone(),
    };

    let counts = result.skip_counts();
    if counts.total() > 0 {
        warn!(
            channel = %raw.channel,
            records = result.records.len(),
            skipped = counts.total(),
            missing_identity = counts.missing_identity,
            malformed = counts.malformed,
            duplicate = counts.duplicate,
            "Skipped feed entries"
        );
    } else {
        debug!(channel = %raw.channel, records = result.records.len(), "Feed loaded");
    }

    Ok(result)
}

/// Load an `options.json` document.
pub fn load_options(bytes: &[u8]) -> Result<(Vec<Record>, Vec<SkippedEntry>), FeedError> {
    load_document(Document::Options, bytes, "name", parse_option)
}

/// Load a `packages.json` document.
pub fn load_packages(bytes: &[u8]) -> Result<(Vec<Record>, Vec<SkippedEntry>), FeedError> {
    load_document(Document::Packages, bytes, "attribute_name", parse_package)
}

fn load_document(
    document: Document,
    bytes: &[u8],
    identity_field: &str,
    parse_entry: fn(String, Value) -> Result<Record, String>,
) -> Result<(Vec<Record>, Vec<SkippedEntry>), FeedError> {
    let raw = entries::parse(bytes).map_err(|reason| FeedError::Unparsable { document, reason })?;

    let mut records = Vec::with_capacity(raw.len());
    let mut skipped = Vec::new();
    let mut seen: HashSet<String> = HashSet::with_capacity(raw.len());

    let candidates: Vec<(Option<String>, Value)> = match raw {
        RawDocument::Keyed(entries) => entries
            .into_iter()
            .map(|(key, value)| (Some(key), value))
            .collect(),
        RawDocument::Listed(entries) => entries
            .into_iter()
            .map(|value| {
                let identity = value
                    .get(identity_field)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (identity, value)
            })
            .collect(),
    };

    for (position, (identity, value)) in candidates.into_iter().enumerate() {
        let mut skip = |identity: Option<String>, reason: SkipReason| {
            skipped.push(SkippedEntry {
                document,
                position,
                identity,
                reason,
            })
        };

        if !value.is_object() {
            skip(
                identity,
                SkipReason::MalformedEntry(format!("expected an object, found {}", type_name(&value))),
            );
            continue;
        }

        let Some(identity) = identity.filter(|id| !id.trim().is_empty()) else {
            skip(None, SkipReason::MissingIdentity);
            continue;
        };

        if seen.contains(&identity) {
            skip(Some(identity), SkipReason::DuplicateIdentity);
            continue;
        }

        match parse_entry(identity.clone(), value) {
            Ok(record) => {
                seen.insert(identity);
                records.push(record);
            }
            Err(reason) => {
                // a malformed first occurrence does not claim the identity
                skip(Some(identity), SkipReason::MalformedEntry(reason));
            }
        }
    }

    Ok((records, skipped))
}

#[derive(Deserialize)]
struct OptionEntry {
    #[serde(default, rename = "type")]
    option_type: Option<String>,
    #[serde(default)]
    description: Option<Value>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    example: Option<Value>,
    #[serde(default)]
    declarations: Vec<String>,
    #[serde(default, rename = "readOnly", alias = "read_only")]
    read_only: bool,
}

fn parse_option(path: String, value: Value) -> Result<Record, String> {
    let entry: OptionEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(Record::Option(OptionRecord {
        path,
        option_type: entry.option_type.unwrap_or_default(),
        default: entry.default.as_ref().and_then(render_value),
        description: entry.description.as_ref().and_then(render_value),
        example: entry.example.as_ref().and_then(render_value),
        declarations: entry.declarations,
        read_only: entry.read_only,
    }))
}

/// A field the feed gives either as one value or as a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    // lists first: a struct would also accept a sequence
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
struct PackageEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    outputs: Option<Vec<String>>,
    #[serde(default)]
    default_output: Option<String>,
    #[serde(default)]
    homepage: Option<OneOrMany<String>>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "longDescription", alias = "long_description")]
    long_description: Option<String>,
    #[serde(default)]
    license: Option<OneOrMany<License>>,
}

fn parse_package(attribute_path: String, value: Value) -> Result<Record, String> {
    let entry: PackageEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;

    let mut outputs: Vec<String> = Vec::new();
    for output in entry.outputs.unwrap_or_default() {
        if !outputs.contains(&output) {
            outputs.push(output);
        }
    }
    if outputs.is_empty() {
        outputs.push("out".to_string());
    }
    let default_output = entry
        .default_output
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| outputs[0].clone());

    Ok(Record::Package(PackageRecord {
        name: entry
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| attribute_path.clone()),
        attribute_path,
        version: entry.version.unwrap_or_default(),
        outputs,
        default_output,
        homepages: entry.homepage.map(OneOrMany::into_vec).unwrap_or_default(),
        description: entry.description.filter(|d| !d.is_empty()),
        long_description: entry.long_description.filter(|d| !d.is_empty()),
        licenses: entry.license.map(OneOrMany::into_vec).unwrap_or_default(),
    }))
}

/// Render an option value as text.
///
/// Typed expressions (`{"_type": "literalExpression", "text": ...}`) render
/// as their text; any other value renders as compact JSON.
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) if map.contains_key("_type") => match map.get("text") {
            Some(Value::String(text)) => Some(text.clone()),
            _ => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(options: &str, packages: &str) -> RawFeed {
        RawFeed {
            channel: "test".to_string(),
            options: options.as_bytes().to_vec(),
            packages: packages.as_bytes().to_vec(),
            revisions: Revisions::new(),
        }
    }

    #[test]
    fn test_load_keyed_options() {
        let (records, skipped) = load_options(
            br#"{
                "services.nginx.enable": {
                    "type": "boolean",
                    "default": {"_type": "literalExpression", "text": "false"},
                    "description": "Whether to enable nginx.",
                    "declarations": ["nixos/modules/services/web-servers/nginx/default.nix"],
                    "readOnly": false
                },
                "services.nginx.package": {
                    "type": "package",
                    "example": {"_type": "literalMD", "text": "`pkgs.nginxMainline`"}
                }
            }"#,
        )
        .unwrap();

        assert!(skipped.is_empty());
        assert_eq!(records.len(), 2);
        let first = records[0].as_option().unwrap();
        assert_eq!(first.path, "services.nginx.enable");
        assert_eq!(first.option_type, "boolean");
        assert_eq!(first.default.as_deref(), Some("false"));
        assert_eq!(first.declarations.len(), 1);

        let second = records[1].as_option().unwrap();
        assert_eq!(second.example.as_deref(), Some("`pkgs.nginxMainline`"));
        assert_eq!(second.default, None);
    }

    #[test]
    fn test_option_plain_json_default_renders_compact() {
        let (records, _) =
            load_options(br#"{"networking.hosts": {"type": "attrs", "default": {"a": [1, 2]}}}"#)
                .unwrap();
        let option = records[0].as_option().unwrap();
        assert_eq!(option.default.as_deref(), Some(r#"{"a":[1,2]}"#));
    }

    #[test]
    fn test_load_packages_with_pluralities() {
        let (records, skipped) = load_packages(
            br#"{
                "nginx": {
                    "name": "nginx-1.26.2",
                    "version": "1.26.2",
                    "outputs": ["out", "doc", "out"],
                    "default_output": "out",
                    "homepage": "https://nginx.org",
                    "description": "A reverse proxy and lightweight webserver",
                    "longDescription": "nginx [engine x] ...",
                    "license": {"fullName": "BSD 2-clause", "spdxId": "BSD-2-Clause", "free": true}
                },
                "hello": {
                    "name": "hello-2.12",
                    "version": null,
                    "outputs": ["out"],
                    "homepage": ["https://gnu.org/hello", "https://example.org"],
                    "license": ["GPL-3.0", {"shortName": "gpl3Plus"}]
                }
            }"#,
        )
        .unwrap();

        assert!(skipped.is_empty());
        let nginx = records[0].as_package().unwrap();
        assert_eq!(nginx.outputs, vec!["out", "doc"]);
        assert_eq!(nginx.homepages, vec!["https://nginx.org"]);
        assert_eq!(nginx.licenses.len(), 1);
        assert_eq!(nginx.licenses[0].label(), "BSD 2-clause");
        assert_eq!(nginx.long_description.as_deref(), Some("nginx [engine x] ..."));

        let hello = records[1].as_package().unwrap();
        assert_eq!(hello.version, "");
        assert_eq!(hello.homepages.len(), 2);
        assert_eq!(hello.licenses[0], License::Verbatim("GPL-3.0".to_string()));
        assert_eq!(hello.licenses[1].label(), "gpl3Plus");
        assert_eq!(hello.default_output, "out");
    }

    #[test]
    fn test_package_defaults() {
        let (records, _) = load_packages(br#"{"python3Packages.requests": {}}"#).unwrap();
        let package = records[0].as_package().unwrap();
        assert_eq!(package.name, "python3Packages.requests");
        assert_eq!(package.outputs, vec!["out"]);
        assert_eq!(package.default_output, "out");
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let (records, skipped) = load_packages(
            br#"{
                "ok": {"name": "ok"},
                "number": 7,
                "bad-outputs": {"outputs": "out"},
                "also-ok": {"name": "also-ok"}
            }"#,
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].position, 1);
        assert_eq!(skipped[0].identity.as_deref(), Some("number"));
        assert!(matches!(skipped[0].reason, SkipReason::MalformedEntry(ref r) if r.contains("number")));
        assert_eq!(skipped[1].identity.as_deref(), Some("bad-outputs"));
        assert!(matches!(skipped[1].reason, SkipReason::MalformedEntry(_)));
    }

    #[test]
    fn test_duplicate_identity_keeps_first() {
        let (records, skipped) = load_packages(
            br#"{"nginx": {"name": "first"}, "nginx": {"name": "second"}, "nginx": {"name": "third"}}"#,
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name(), "first");
        assert_eq!(skipped.len(), 2);
        assert!(skipped
            .iter()
            .all(|s| s.reason == SkipReason::DuplicateIdentity));
    }

    #[test]
    fn test_malformed_first_occurrence_does_not_block_later_one() {
        let (records, skipped) =
            load_packages(br#"{"nginx": {"outputs": 1}, "nginx": {"name": "good"}}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name(), "good");
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn test_missing_identity() {
        let (records, skipped) = load_options(
            br#"[
                {"name": "boot.loader.grub.enable", "type": "boolean"},
                {"type": "string"},
                {"name": "  ", "type": "string"},
                "not an object"
            ]"#,
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity(), "boot.loader.grub.enable");
        let reasons: Vec<&SkipReason> = skipped.iter().map(|s| &s.reason).collect();
        assert_eq!(reasons[0], &SkipReason::MissingIdentity);
        assert_eq!(reasons[1], &SkipReason::MissingIdentity);
        assert!(matches!(reasons[2], SkipReason::MalformedEntry(_)));
    }

    #[test]
    fn test_empty_key_is_missing_identity() {
        let (records, skipped) = load_packages(br#"{"": {"name": "anonymous"}}"#).unwrap();
        assert!(records.is_empty());
        assert_eq!(skipped[0].reason, SkipReason::MissingIdentity);
    }

    #[test]
    fn test_unparsable_document_aborts() {
        let result = load_feed(&feed("{}", "{\"nginx\": "));
        assert!(matches!(
            result,
            Err(FeedError::Unparsable {
                document: Document::Packages,
                ..
            })
        ));

        let result = load_feed(&feed("true", "{}"));
        assert!(matches!(
            result,
            Err(FeedError::Unparsable {
                document: Document::Options,
                ..
            })
        ));
    }

    #[test]
    fn test_one_malformed_among_many() {
        let mut packages = String::from("{");
        for i in 0..1000 {
            if i == 500 {
                packages.push_str("\"broken\": [1, 2],");
            }
            packages.push_str(&format!("\"pkg{i}\": {{\"name\": \"pkg{i}\"}}"));
            if i < 999 {
                packages.push(',');
            }
        }
        packages.push('}');

        let result = load_feed(&feed("{}", &packages)).unwrap();
        assert_eq!(result.records.len(), 1000);
        assert_eq!(result.skip_counts().total(), 1);
        assert_eq!(result.skip_counts().malformed, 1);
    }

    #[test]
    fn test_load_feed_combines_documents() {
        let mut raw = feed(
            r#"{"services.nginx.enable": {"type": "boolean"}}"#,
            r#"{"nginx": {"name": "nginx"}, "nginx": {}}"#,
        );
        raw.revisions.insert("nixpkgs".to_string(), "abc123".to_string());

        let result = load_feed(&raw).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.skip_counts().duplicate, 1);
        assert_eq!(result.revisions.get("nixpkgs").map(String::as_str), Some("abc123"));
    }
}

//! Match classes and result ordering.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use fc_search_types::Record;

/// How a record matched a query, best first.
///
/// The derived `Ord` follows declaration order, so a smaller class is a
/// better match. Results are ordered by [`MatchClass::tier`], which groups
/// classes into exact, prefix, substring and multi-term matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchClass {
    /// Identity or display name equals the query.
    Exact,
    /// Identity or display name starts with the query.
    Prefix,
    /// The query starts at a later `.` segment of the identity.
    SegmentPrefix,
    /// Identity or display name contains the query elsewhere.
    Substring,
    /// Only the description contains the query.
    Description,
    /// Every word of a multi-word query matches some field, the whole query
    /// does not.
    Terms,
}

impl MatchClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchClass::Exact => "exact",
            MatchClass::Prefix => "prefix",
            MatchClass::SegmentPrefix => "segment_prefix",
            MatchClass::Substring => "substring",
            MatchClass::Description => "description",
            MatchClass::Terms => "terms",
        }
    }

    /// Ranking tier. Classes sharing a tier are ordered by identity length,
    /// not by class.
    pub fn tier(&self) -> u8 {
        match self {
            MatchClass::Exact => 0,
            MatchClass::Prefix | MatchClass::SegmentPrefix => 1,
            MatchClass::Substring | MatchClass::Description => 2,
            MatchClass::Terms => 3,
        }
    }
}

impl fmt::Display for MatchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased searchable text of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoweredFields {
    pub identity: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl LoweredFields {
    pub fn of(record: &Record) -> Self {
        let fields = record.search_fields();
        Self {
            identity: fields.identity.to_lowercase(),
            name: fields.name.map(str::to_lowercase),
            description: fields.description.map(str::to_lowercase),
        }
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.identity.as_str())
            .chain(self.name.as_deref())
            .chain(self.description.as_deref())
    }

    /// Classify against the fields alone. Identity equality and identity
    /// prefixes are answered by the index structures and never reported here.
    pub fn classify(&self, query: &str, terms: &[&str]) -> Option<MatchClass> {
        let name = self.name.as_deref();

        if name == Some(query) {
            return Some(MatchClass::Exact);
        }
        if name.is_some_and(|n| n.starts_with(query)) {
            return Some(MatchClass::Prefix);
        }
        if self.identity.contains(query) || name.is_some_and(|n| n.contains(query)) {
            return Some(MatchClass::Substring);
        }
        if self
            .description
            .as_deref()
            .is_some_and(|d| d.contains(query))
        {
            return Some(MatchClass::Description);
        }
        if terms.len() > 1
            && terms
                .iter()
                .all(|term| self.texts().any(|text| text.contains(term)))
        {
            return Some(MatchClass::Terms);
        }
        None
    }
}

/// Result order: tier, then shorter identity, then identity, then kind.
pub(crate) fn compare(a: (MatchClass, &Record), b: (MatchClass, &Record)) -> Ordering {
    a.0.tier()
        .cmp(&b.0.tier())
        .then_with(|| a.1.identity().len().cmp(&b.1.identity().len()))
        .then_with(|| a.1.identity().cmp(b.1.identity()))
        .then_with(|| a.1.kind().cmp(&b.1.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_search_types::{OptionRecord, PackageRecord};

    fn package(path: &str, name: &str, description: Option<&str>) -> Record {
        Record::Package(PackageRecord {
            attribute_path: path.to_string(),
            name: name.to_string(),
            version: String::new(),
            outputs: vec!["out".to_string()],
            default_output: "out".to_string(),
            homepages: Vec::new(),
            description: description.map(str::to_string),
            long_description: None,
            licenses: Vec::new(),
        })
    }

    fn option(path: &str) -> Record {
        Record::Option(OptionRecord {
            path: path.to_string(),
            option_type: "boolean".to_string(),
            default: None,
            description: Some("Whether to enable nginx".to_string()),
            example: None,
            declarations: Vec::new(),
            read_only: false,
        })
    }

    #[test]
    fn test_class_order() {
        assert!(MatchClass::Exact < MatchClass::Prefix);
        assert!(MatchClass::Prefix < MatchClass::SegmentPrefix);
        assert!(MatchClass::SegmentPrefix < MatchClass::Substring);
        assert!(MatchClass::Substring < MatchClass::Description);
        assert!(MatchClass::Description < MatchClass::Terms);
    }

    #[test]
    fn test_classify_by_name() {
        let fields = LoweredFields::of(&package("python3Packages.Django", "python3.12-django-5.1", None));
        assert_eq!(fields.identity, "python3packages.django");
        assert_eq!(fields.classify("python3.12-django-5.1", &[]), Some(MatchClass::Exact));
        assert_eq!(fields.classify("python3.12", &[]), Some(MatchClass::Prefix));
        assert_eq!(fields.classify("django", &[]), Some(MatchClass::Substring));
        assert_eq!(fields.classify("flask", &[]), None);
    }

    #[test]
    fn test_classify_description_and_terms() {
        let fields = LoweredFields::of(&package(
            "nginx",
            "nginx",
            Some("A reverse proxy and lightweight webserver"),
        ));
        assert_eq!(fields.classify("reverse proxy", &["reverse", "proxy"]), Some(MatchClass::Description));
        assert_eq!(
            fields.classify("nginx webserver", &["nginx", "webserver"]),
            Some(MatchClass::Terms)
        );
        assert_eq!(fields.classify("nginx apache", &["nginx", "apache"]), None);
    }

    #[test]
    fn test_option_description_is_not_searchable() {
        let fields = LoweredFields::of(&option("services.nginx.enable"));
        assert_eq!(fields.description, None);
        assert_eq!(fields.classify("whether", &[]), None);
        assert_eq!(fields.classify("nginx.en", &[]), Some(MatchClass::Substring));
    }

    #[test]
    fn test_compare_ties() {
        let short = package("nginx", "nginx", None);
        let long = package("nginx-mainline", "nginx-mainline", None);
        let other = package("angie", "angie", None);

        assert_eq!(
            compare((MatchClass::Prefix, &short), (MatchClass::Prefix, &long)),
            Ordering::Less
        );
        // same length: identity decides
        assert_eq!(
            compare((MatchClass::Substring, &other), (MatchClass::Substring, &short)),
            Ordering::Less
        );
        // tier beats length
        assert_eq!(
            compare((MatchClass::Exact, &long), (MatchClass::Prefix, &short)),
            Ordering::Less
        );
        // within a tier length beats class
        assert_eq!(
            compare((MatchClass::SegmentPrefix, &short), (MatchClass::Prefix, &long)),
            Ordering::Less
        );
        assert_eq!(
            compare((MatchClass::Description, &short), (MatchClass::Substring, &long)),
            Ordering::Less
        );
    }

    #[test]
    fn test_tiers() {
        assert_eq!(MatchClass::Prefix.tier(), MatchClass::SegmentPrefix.tier());
        assert_eq!(MatchClass::Substring.tier(), MatchClass::Description.tier());
        assert!(MatchClass::Exact.tier() < MatchClass::Prefix.tier());
        assert!(MatchClass::Description.tier() < MatchClass::Terms.tier());
    }
}

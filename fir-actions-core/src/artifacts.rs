//! Artifact extraction and the block/artifact link table.
//!
//! [`extract`] is a pure scan of free text for indicators. [`ArtifactIndex`]
//! is the record side: artifacts are found or created by `(kind, value)` and
//! linked to blocks at most once.

use crate::types::{ArtifactId, BlockId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Kinds of indicator the extractor recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Ip,
    Domain,
    Url,
    Email,
    Md5,
    Sha1,
    Sha256,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Ip,
        ArtifactKind::Domain,
        ArtifactKind::Url,
        ArtifactKind::Email,
        ArtifactKind::Md5,
        ArtifactKind::Sha1,
        ArtifactKind::Sha256,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Ip => "ip",
            ArtifactKind::Domain => "domain",
            ArtifactKind::Url => "url",
            ArtifactKind::Email => "email",
            ArtifactKind::Md5 => "md5",
            ArtifactKind::Sha1 => "sha1",
            ArtifactKind::Sha256 => "sha256",
        }
    }

    fn pattern(&self) -> &'static Regex {
        static IP: OnceLock<Regex> = OnceLock::new();
        static DOMAIN: OnceLock<Regex> = OnceLock::new();
        static URL: OnceLock<Regex> = OnceLock::new();
        static EMAIL: OnceLock<Regex> = OnceLock::new();
        static MD5: OnceLock<Regex> = OnceLock::new();
        static SHA1: OnceLock<Regex> = OnceLock::new();
        static SHA256: OnceLock<Regex> = OnceLock::new();

        let (cell, source) = match self {
            ArtifactKind::Ip => (
                &IP,
                r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            ),
            ArtifactKind::Domain => (
                &DOMAIN,
                r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}\b",
            ),
            ArtifactKind::Url => (&URL, r#"\b(?:https?|ftp)://[^\s<>"']+"#),
            ArtifactKind::Email => (
                &EMAIL,
                r"\b[a-zA-Z0-9._%+-]+@(?:[a-zA-Z0-9-]+\.)+[a-zA-Z]{2,63}\b",
            ),
            ArtifactKind::Md5 => (&MD5, r"\b[a-fA-F0-9]{32}\b"),
            ArtifactKind::Sha1 => (&SHA1, r"\b[a-fA-F0-9]{40}\b"),
            ArtifactKind::Sha256 => (&SHA256, r"\b[a-fA-F0-9]{64}\b"),
        };
        cell.get_or_init(|| Regex::new(source).expect("artifact pattern is a valid regex"))
    }

    /// Canonical form used for de-duplication.
    fn normalize(&self, raw: &str) -> String {
        match self {
            ArtifactKind::Url | ArtifactKind::Ip => raw.to_string(),
            _ => raw.to_lowercase(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArtifactKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown artifact kind: {s}"))
    }
}

/// Indicators found in a text, grouped by kind.
pub type Extraction = BTreeMap<ArtifactKind, BTreeSet<String>>;

/// Scan `text` for every kind in `kinds`.
pub fn extract(text: &str, kinds: &[ArtifactKind]) -> Extraction {
    let mut found = Extraction::new();
    for kind in kinds {
        let values: BTreeSet<String> = kind
            .pattern()
            .find_iter(text)
            .filter(|m| !(*kind == ArtifactKind::Domain && is_email_local_part(text, m.end())))
            .map(|m| kind.normalize(m.as_str()))
            .filter(|value| !(*kind == ArtifactKind::Domain && is_email_host(text, value)))
            .collect();
        if !values.is_empty() {
            found.insert(*kind, values);
        }
    }
    debug!(
        kinds = found.len(),
        values = found.values().map(BTreeSet::len).sum::<usize>(),
        "Extracted artifacts"
    );
    found
}

/// Scan `text` for every known kind.
pub fn extract_all(text: &str) -> Extraction {
    extract(text, &ArtifactKind::ALL)
}

/// Whether the match ending at `end` is the local part of an email.
fn is_email_local_part(text: &str, end: usize) -> bool {
    text[end..].starts_with('@')
}

/// Whether `domain` only appears in `text` as the host part of an email.
fn is_email_host(text: &str, domain: &str) -> bool {
    let lower = text.to_lowercase();
    let mut any = false;
    for (start, _) in lower.match_indices(domain) {
        any = true;
        if start == 0 || lower.as_bytes()[start - 1] != b'@' {
            return false;
        }
    }
    any
}

/// An indicator record, shared by every block it was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub value: String,
    #[serde(default)]
    pub blocks: BTreeSet<BlockId>,
}

/// Artifact records keyed by id, with a `(kind, value)` lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactIndex {
    artifacts: BTreeMap<ArtifactId, Artifact>,
    next_id: u64,
}

impl ArtifactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, kind: ArtifactKind, value: &str) -> Option<&Artifact> {
        self.artifacts
            .values()
            .find(|artifact| artifact.kind == kind && artifact.value == value)
    }

    /// Return the id of the `(kind, value)` artifact, creating it if needed.
    pub fn find_or_create(&mut self, kind: ArtifactKind, value: &str) -> ArtifactId {
        if let Some(existing) = self.find(kind, value) {
            return existing.id;
        }
        self.next_id += 1;
        let id = ArtifactId(self.next_id);
        self.artifacts.insert(
            id,
            Artifact {
                id,
                kind,
                value: value.to_string(),
                blocks: BTreeSet::new(),
            },
        );
        id
    }

    /// Link an artifact to a block. Returns false when already linked.
    pub fn link(&mut self, artifact: ArtifactId, block: BlockId) -> bool {
        self.artifacts
            .get_mut(&artifact)
            .is_some_and(|record| record.blocks.insert(block))
    }

    /// Find or create and link every extracted value.
    pub fn record(&mut self, block: BlockId, extraction: &Extraction) {
        for (kind, values) in extraction {
            for value in values {
                let id = self.find_or_create(*kind, value);
                self.link(id, block);
            }
        }
    }

    pub fn for_block(&self, block: BlockId) -> Vec<&Artifact> {
        self.artifacts
            .values()
            .filter(|artifact| artifact.blocks.contains(&block))
            .collect()
    }

    pub fn get(&self, id: ArtifactId) -> Option<&Artifact> {
        self.artifacts.get(&id)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Cross-references a saved artifact with its other owners.
pub trait ArtifactCorrelator: Send + Sync {
    fn after_save(&self, kind: ArtifactKind, value: &str, block: BlockId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ip_and_domain() {
        let found = extract_all("8.8.8.8 and evil.com");
        assert_eq!(
            found,
            BTreeMap::from([
                (ArtifactKind::Ip, BTreeSet::from(["8.8.8.8".to_string()])),
                (ArtifactKind::Domain, BTreeSet::from(["evil.com".to_string()])),
            ])
        );
    }

    #[test]
    fn test_hashes_by_length() {
        let md5 = "d41d8cd98f00b204e9800998ecf8427e";
        let sha1 = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let found = extract_all(&format!("{md5}\n{sha1}\n{sha256}"));
        assert_eq!(found[&ArtifactKind::Md5].len(), 1);
        assert_eq!(found[&ArtifactKind::Sha1].len(), 1);
        assert_eq!(found[&ArtifactKind::Sha256].len(), 1);
    }

    #[test]
    fn test_duplicates_collapse_case_insensitively() {
        let found = extract_all("Evil.COM evil.com EVIL.com");
        assert_eq!(found[&ArtifactKind::Domain].len(), 1);
        assert!(found[&ArtifactKind::Domain].contains("evil.com"));
    }

    #[test]
    fn test_email_host_is_not_a_domain() {
        let found = extract_all("contact phish@bad-mail.net");
        assert!(found[&ArtifactKind::Email].contains("phish@bad-mail.net"));
        assert!(!found.contains_key(&ArtifactKind::Domain));
    }

    #[test]
    fn test_dotted_email_local_part_is_not_a_domain() {
        let found = extract_all("report from john.doe@evil.com, seen on evil.org");
        assert!(found[&ArtifactKind::Email].contains("john.doe@evil.com"));
        assert_eq!(found[&ArtifactKind::Domain], BTreeSet::from(["evil.org".to_string()]));
    }

    #[test]
    fn test_restricted_kinds() {
        let found = extract("8.8.8.8 and evil.com", &[ArtifactKind::Ip]);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&ArtifactKind::Ip));
    }

    #[test]
    fn test_out_of_range_ip_ignored() {
        let found = extract("999.1.1.1", &[ArtifactKind::Ip]);
        assert!(found.is_empty());
    }

    #[test]
    fn test_index_links_once() {
        let mut index = ArtifactIndex::new();
        let extraction = extract_all("8.8.8.8 and evil.com");
        index.record(BlockId(1), &extraction);
        index.record(BlockId(1), &extraction);

        assert_eq!(index.len(), 2);
        for artifact in index.for_block(BlockId(1)) {
            assert_eq!(artifact.blocks, BTreeSet::from([BlockId(1)]));
        }

        let id = index.find_or_create(ArtifactKind::Ip, "8.8.8.8");
        assert!(index.link(id, BlockId(2)));
        assert!(!index.link(id, BlockId(2)));
        assert_eq!(index.get(id).unwrap().blocks.len(), 2);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("SHA256".parse::<ArtifactKind>().unwrap(), ArtifactKind::Sha256);
        assert!("hostname".parse::<ArtifactKind>().is_err());
    }
}

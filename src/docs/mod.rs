pub mod extract;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use types::{render_args, ApiEntry, ApiMatch, MatchLocation, MatchRecord};

pub const MAX_RESULTS: usize = 50;

/// Symbol table of the library the agent writes code against, keyed by name.
/// Immutable once built.
#[derive(Debug, Default)]
pub struct ApiIndex {
    root: PathBuf,
    entries: BTreeMap<String, ApiEntry>,
}

impl ApiIndex {
    pub fn from_entries(root: impl Into<PathBuf>, entries: BTreeMap<String, ApiEntry>) -> Self {
        Self {
            root: root.into(),
            entries,
        }
    }

    pub async fn build(root: &Path) -> Result<Self> {
        let dir = root.to_path_buf();
        let dump = tokio::task::spawn_blocking(move || extract::extract_api(&dir))
            .await
            .context("API extraction task panicked")??;
        info!(root = %root.display(), entries = dump.entries.len(), "API index built");
        Ok(Self::from_entries(root, dump.entries))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn lookup(&self, name: &str) -> Option<ApiMatch> {
        self.entries.get(name).map(|entry| ApiMatch {
            name: name.to_string(),
            entry: entry.clone(),
            matches: vec![MatchRecord {
                location: MatchLocation::Exact,
                text: name.to_string(),
                member: None,
            }],
        })
    }

    /// Regex search over names, signatures, docstrings, methods and attributes.
    /// Every place an entry matched is reported.
    pub fn search(
        &self,
        pattern: &str,
        case_sensitive: bool,
        max_results: usize,
    ) -> Result<Vec<ApiMatch>, regex::Error> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;

        let mut results = Vec::new();
        for (name, entry) in &self.entries {
            if results.len() >= max_results {
                break;
            }
            let matches = match_entry(&re, name, entry);
            if !matches.is_empty() {
                results.push(ApiMatch {
                    name: name.clone(),
                    entry: entry.clone(),
                    matches,
                });
            }
        }
        debug!(pattern, hits = results.len(), "API search");
        Ok(results)
    }
}

fn record(location: MatchLocation, text: String, member: Option<&str>) -> MatchRecord {
    MatchRecord {
        location,
        text,
        member: member.map(str::to_string),
    }
}

fn match_entry(re: &Regex, name: &str, entry: &ApiEntry) -> Vec<MatchRecord> {
    let mut out = Vec::new();

    if re.is_match(name) {
        out.push(record(MatchLocation::Name, name.to_string(), None));
    }
    if let Some(signature) = entry.signature(name) {
        if re.is_match(&signature) {
            out.push(record(MatchLocation::Signature, signature, None));
        }
    }
    if let Some(doc) = entry.docstring.as_deref().filter(|d| re.is_match(d)) {
        out.push(record(MatchLocation::Docstring, doc.to_string(), None));
    }

    for (method, info) in entry.methods.iter().flatten() {
        let full = format!("{}.{}", name, method);
        if re.is_match(&full) {
            out.push(record(MatchLocation::MethodName, full.clone(), Some(method.as_str())));
        }
        if let Some(doc) = info.docstring.as_deref().filter(|d| re.is_match(d)) {
            out.push(record(MatchLocation::MethodDocstring, doc.to_string(), Some(method.as_str())));
        }
        let args = info.args.as_ref().map(render_args).unwrap_or_default();
        let mut signature = format!("{}({})", full, args);
        if let Some(returns) = info.returns.as_deref().filter(|r| !r.is_empty()) {
            signature.push_str(" -> ");
            signature.push_str(returns);
        }
        if re.is_match(&signature) {
            out.push(record(MatchLocation::MethodSignature, signature, Some(method.as_str())));
        }
    }

    for (attr, info) in entry.attributes.iter().flatten() {
        let full = format!("{}.{}", name, attr);
        if re.is_match(&full) {
            out.push(record(MatchLocation::AttributeName, full.clone(), Some(attr.as_str())));
        }
        if let Some(ty) = info.type_annotation.as_deref().filter(|t| re.is_match(t)) {
            out.push(record(
                MatchLocation::AttributeType,
                format!("{}: {}", full, ty),
                Some(attr.as_str()),
            ));
        }
    }

    out
}

/// Process-wide, build-once holder for the API index.
pub struct ApiIndexCell {
    slot: RwLock<Option<Arc<ApiIndex>>>,
}

impl ApiIndexCell {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<Arc<ApiIndex>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The index, building it from `root` on first use.
    pub async fn get_or_build(&self, root: &Path) -> Result<Arc<ApiIndex>> {
        if let Some(index) = self.current() {
            debug!(root = %index.root().display(), entries = index.len(), "reusing API index");
            return Ok(index);
        }
        self.rebuild(root).await
    }

    /// Discard any existing index and build a fresh one.
    pub async fn rebuild(&self, root: &Path) -> Result<Arc<ApiIndex>> {
        let index = Arc::new(ApiIndex::build(root).await?);
        self.install(index.clone());
        Ok(index)
    }

    pub fn install(&self, index: Arc<ApiIndex>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(index);
    }
}

impl Default for ApiIndexCell {
    fn default() -> Self {
        Self::new()
    }
}

static SHARED_INDEX: ApiIndexCell = ApiIndexCell::new();

pub fn shared() -> &'static ApiIndexCell {
    &SHARED_INDEX
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::AttributeInfo;

    fn sample() -> ApiIndex {
        let mut entries = BTreeMap::new();
        entries.insert(
            "make_delay".to_string(),
            ApiEntry {
                args: Some(BTreeMap::from([("ms".to_string(), "float".to_string())])),
                returns: Some("Delay".into()),
                docstring: Some("Create a delay line.".into()),
                ..Default::default()
            },
        );
        entries.insert(
            "Reverb".to_string(),
            ApiEntry {
                docstring: Some("Room simulation.".into()),
                methods: Some(BTreeMap::from([(
                    "set_decay".to_string(),
                    ApiEntry {
                        args: Some(BTreeMap::from([("t".to_string(), "float".to_string())])),
                        docstring: Some("Set the decay time.".into()),
                        ..Default::default()
                    },
                )])),
                attributes: Some(BTreeMap::from([(
                    "decay".to_string(),
                    AttributeInfo {
                        type_annotation: Some("float".into()),
                    },
                )])),
                ..Default::default()
            },
        );
        ApiIndex::from_entries("/lib", entries)
    }

    #[test]
    fn test_exact_lookup() {
        let index = sample();
        let hit = index.lookup("make_delay").unwrap();
        assert_eq!(hit.matches[0].location, MatchLocation::Exact);
        assert!(index.lookup("make").is_none());
    }

    #[test]
    fn test_search_reports_every_location() {
        let index = sample();
        let hits = index.search("decay", false, MAX_RESULTS).unwrap();
        assert_eq!(hits.len(), 1);
        let locations: Vec<MatchLocation> = hits[0].matches.iter().map(|m| m.location).collect();
        assert_eq!(
            locations,
            vec![
                MatchLocation::MethodName,
                MatchLocation::MethodDocstring,
                MatchLocation::MethodSignature,
                MatchLocation::AttributeName,
            ]
        );
        assert_eq!(hits[0].matches[2].text, "Reverb.set_decay(t: float)");
        assert_eq!(hits[0].matches[0].member.as_deref(), Some("set_decay"));
    }

    #[test]
    fn test_search_case_and_signature() {
        let index = sample();
        assert!(index.search("DELAY", true, MAX_RESULTS).unwrap().is_empty());
        let hits = index.search(r"-> Delay", true, MAX_RESULTS).unwrap();
        assert_eq!(hits[0].matches[0].location, MatchLocation::Signature);
        assert_eq!(hits[0].matches[0].text, "make_delay(ms: float) -> Delay");
        assert!(index.search("(", false, MAX_RESULTS).is_err());
        assert_eq!(index.search(".", false, 1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cell_serves_installed_index() {
        let cell = ApiIndexCell::new();
        cell.install(Arc::new(sample()));
        let index = cell.get_or_build(Path::new("/does/not/matter")).await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.root(), Path::new("/lib"));
    }
}

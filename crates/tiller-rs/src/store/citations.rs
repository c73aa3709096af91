//! Resolve `【id†location】` citations in a report against the shared
//! resource registry.
//!
//! Locations are `S<n>` (snippet `n` of the resource) or `L<a>` / `L<a>-L<b>`
//! (a line range of a fetched document). Compound blocks such as
//! `【3, 5†L2】` are split into single citations first; a bare id means `S1`.
//! Citations that do not resolve are removed from the text.

use super::resources::Resource;
use super::{SharedStore, StoreError, keys};
use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;
use tracing::{info, warn};

static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【[^】]+】").expect("citation block pattern"));

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"【(\d+)†([LS]\d+(?:-[LS]\d+)?)】").expect("citation pattern")
});

/// One resolved citation.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Citation {
    /// The exact marker as it appears in the report, e.g. `【3†S1】`.
    pub key: String,
    pub text: String,
    pub url: String,
    pub title: String,
}

/// A report with citations normalized and a references section appended.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CitedReport {
    pub content: String,
    pub citations: Vec<Citation>,
}

/// Split compound blocks into one block per citation.
fn split_compound_blocks(report: &str) -> String {
    BLOCK_RE
        .replace_all(report, |caps: &Captures<'_>| {
            let inner = caps[0].trim_start_matches('【').trim_end_matches('】');
            inner
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| {
                    if item.contains('†') {
                        format!("【{item}】")
                    } else {
                        format!("【{item}†S1】")
                    }
                })
                .collect::<String>()
        })
        .into_owned()
}

fn parse_numbered(s: &str, prefix: char) -> Option<u64> {
    s.strip_prefix(prefix)?.parse().ok()
}

/// Look up the cited text for a location within one resource.
fn cited_text(resource: &Resource, location: &str) -> Option<String> {
    if let Some(snippet_id) = parse_numbered(location, 'S') {
        return resource.snippets.get(&snippet_id).cloned();
    }

    let (start, end) = match location.split_once('-') {
        Some((a, b)) => (parse_numbered(a, 'L')?, parse_numbered(b, 'L')?),
        None => {
            let line = parse_numbered(location, 'L')?;
            (line, line)
        }
    };
    if start > end {
        return None;
    }
    let lines: Option<Vec<&str>> = (start..=end)
        .map(|n| resource.lines.get(&n).map(String::as_str))
        .collect();
    Some(lines?.join("\n\n").trim().to_string())
}

/// Normalize and resolve every citation in `report`.
pub async fn resolve_citations(
    store: &SharedStore,
    report: &str,
) -> Result<CitedReport, StoreError> {
    let mut content = split_compound_blocks(report);

    let found: Vec<(String, u64, String)> = CITATION_RE
        .captures_iter(&content)
        .filter_map(|c| {
            let id = c[1].parse().ok()?;
            Some((c[0].to_string(), id, c[2].to_string()))
        })
        .collect();
    info!("Found {} citation(s) in report", found.len());

    let mut citations: Vec<Citation> = Vec::new();
    {
        let guard = store.lock(&keys::resources()).await;
        let resources = guard.get()?.unwrap_or_default();

        for (key, id, location) in found {
            if citations.iter().any(|c| c.key == key) {
                continue;
            }
            let resolved = resources
                .values()
                .find(|r| r.id == id)
                .and_then(|r| cited_text(r, &location).map(|text| (r, text)));
            match resolved {
                Some((resource, text)) => citations.push(Citation {
                    key,
                    text,
                    url: resource.link.clone(),
                    title: resource.title.clone(),
                }),
                None => {
                    warn!("Citation {key} does not resolve, removing it");
                    content = content.replace(&key, "");
                }
            }
        }
    }

    info!("Resolved {} citation(s)", citations.len());
    if !citations.is_empty() {
        let references: String = citations
            .iter()
            .map(|c| format!("- {}: [{}]({})\n", c.key, c.title, c.url))
            .collect();
        content = format!(
            "{}\n\n## References\n\n{}",
            content.trim_end(),
            references.trim_end()
        );
    }

    Ok(CitedReport { content, citations })
}

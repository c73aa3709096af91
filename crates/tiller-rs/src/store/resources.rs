//! Shared registry of search resources and their citable fragments.
//!
//! Every agent that runs a search pushes its results through
//! [`register_search_results`]. Each distinct URL gets a stable integer id
//! and each distinct snippet of that URL a stable snippet id, so the report
//! writer can cite `【3†S2】` regardless of which agent found the source.
//!
//! Ids are allocated as "largest existing id + 1". That is only correct
//! while the `resources` key lock is held, which every function here does.

use super::{SharedStore, StoreError, keys};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A registered source.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Resource {
    pub id: u64,
    pub link: String,
    #[serde(default)]
    pub title: String,
    /// Snippet id → snippet text.
    #[serde(default)]
    pub snippets: BTreeMap<u64, String>,
    /// Line id → line text, for fetched documents.
    #[serde(default)]
    pub lines: BTreeMap<u64, String>,
}

impl Resource {
    fn snippet_id(&self, snippet: &str) -> Option<u64> {
        self.snippets
            .iter()
            .find(|(_, text)| text.as_str() == snippet)
            .map(|(id, _)| *id)
    }

    fn next_snippet_id(&self) -> u64 {
        self.snippets.keys().max().map_or(1, |max| max + 1)
    }
}

/// URL → resource.
pub type ResourceMap = BTreeMap<String, Resource>;

/// One search hit as returned by a search tool. `id` and `snippet_id` are
/// filled in by [`register_search_results`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SearchResult {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<u64>,
}

fn next_resource_id(resources: &ResourceMap) -> u64 {
    resources.values().map(|r| r.id).max().map_or(1, |max| max + 1)
}

/// Assign resource and snippet ids to `results`, registering anything new.
///
/// Results without a link are left untouched.
pub async fn register_search_results(
    store: &SharedStore,
    results: &mut [SearchResult],
) -> Result<(), StoreError> {
    let mut guard = store.lock(&keys::resources()).await;
    let mut resources = guard.get()?.unwrap_or_default();
    let before = resources.len();

    for result in results.iter_mut() {
        let Some(link) = result.link.clone().filter(|l| !l.is_empty()) else {
            continue;
        };

        if !resources.contains_key(&link) {
            let id = next_resource_id(&resources);
            resources.insert(
                link.clone(),
                Resource {
                    id,
                    link: link.clone(),
                    title: result.title.clone().unwrap_or_default(),
                    ..Default::default()
                },
            );
        }
        let Some(resource) = resources.get_mut(&link) else {
            continue;
        };
        result.id = Some(resource.id);

        if let Some(snippet) = result.snippet.as_deref().filter(|s| !s.is_empty()) {
            let snippet_id = match resource.snippet_id(snippet) {
                Some(id) => id,
                None => {
                    let id = resource.next_snippet_id();
                    resource.snippets.insert(id, snippet.to_string());
                    id
                }
            };
            result.snippet_id = Some(snippet_id);
        }
    }

    debug!(
        "Registered {} search result(s), {} new resource(s)",
        results.len(),
        resources.len() - before
    );
    guard.set(&resources)
}

/// Register a fetched document's lines so `L<n>` citations resolve.
///
/// Lines are numbered from 1. Returns the resource id.
pub async fn register_document(
    store: &SharedStore,
    link: &str,
    title: &str,
    lines: &[String],
) -> Result<u64, StoreError> {
    let mut guard = store.lock(&keys::resources()).await;
    let mut resources = guard.get()?.unwrap_or_default();

    let id = match resources.get(link) {
        Some(existing) => existing.id,
        None => next_resource_id(&resources),
    };
    let resource = resources.entry(link.to_string()).or_insert_with(|| Resource {
        id,
        link: link.to_string(),
        ..Default::default()
    });
    if resource.title.is_empty() {
        resource.title = title.to_string();
    }
    resource.lines = (1u64..).zip(lines.iter().cloned()).collect();

    guard.set(&resources)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hit(link: &str, snippet: &str) -> SearchResult {
        SearchResult {
            link: Some(link.into()),
            title: Some(format!("Title of {link}")),
            snippet: Some(snippet.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assigns_sequential_ids_and_reuses_known_urls() {
        let store = SharedStore::new();
        let mut first = vec![hit("https://a", "alpha"), hit("https://b", "beta")];
        register_search_results(&store, &mut first).await.unwrap();
        assert_eq!(first[0].id, Some(1));
        assert_eq!(first[1].id, Some(2));

        let mut second = vec![hit("https://b", "beta"), hit("https://b", "beta two")];
        register_search_results(&store, &mut second).await.unwrap();
        assert_eq!(second[0].id, Some(2));
        assert_eq!(second[0].snippet_id, Some(1));
        assert_eq!(second[1].snippet_id, Some(2));
    }

    #[tokio::test]
    async fn results_without_link_are_skipped() {
        let store = SharedStore::new();
        let mut results = vec![SearchResult {
            snippet: Some("orphan".into()),
            ..Default::default()
        }];
        register_search_results(&store, &mut results).await.unwrap();
        assert!(results[0].id.is_none());
        assert!(store.get(&keys::resources()).unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_agents_never_share_an_id() {
        let store = Arc::new(SharedStore::new());
        let mut handles = Vec::new();
        for agent in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut results: Vec<SearchResult> = (0..5)
                    .map(|n| hit(&format!("https://agent{agent}/doc{n}"), "s"))
                    .collect();
                register_search_results(&store, &mut results).await.unwrap();
            }));
        }
        futures::future::join_all(handles).await;

        let resources = store.get(&keys::resources()).unwrap().unwrap();
        let mut ids: Vec<u64> = resources.values().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn register_document_numbers_lines_from_one() {
        let store = SharedStore::new();
        let id = register_document(
            &store,
            "https://doc",
            "Doc",
            &["first".to_string(), "second".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(id, 1);
        let resources = store.get(&keys::resources()).unwrap().unwrap();
        assert_eq!(resources["https://doc"].lines[&2], "second");
    }
}

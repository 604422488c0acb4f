//! Commit coordinator — resolves a batch of intents into final file bodies
//! and pushes them as one atomic commit.
//!
//! Resolution happens once per batch. Intents are grouped by path and applied
//! in the order given, so two patches to the same file see each other's
//! output. The resolved map is then submitted as a single multi-file commit;
//! a reference conflict resubmits the same map (it is not re-resolved) with
//! exponential backoff until the attempt budget is spent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ctxpack_config::{CtxpackConfig, RetryConfig};
use ctxpack_core::error::{Error, Result};
use ctxpack_core::intent::{Edit, ValidatedIntent, WriteIntent, validate_batch};
use ctxpack_core::pack::{Direction, VersionStamp};
use ctxpack_core::path::PathRules;
use ctxpack_core::store::{FileContent, FileWrite, RemoteStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::drop_filled_placeholders;

/// What a commit did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReceipt {
    /// `None` when the batch was empty and nothing was submitted
    pub commit_id: Option<String>,
    /// Store paths written, in commit order
    pub files: Vec<String>,
    /// Submissions made, including the successful one
    pub attempts: u32,
    /// Paths whose intent content was truncated
    pub truncated: Vec<String>,
}

impl CommitReceipt {
    pub fn empty() -> Self {
        Self {
            commit_id: None,
            files: Vec::new(),
            attempts: 0,
            truncated: Vec::new(),
        }
    }
}

/// Final file bodies for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub files: BTreeMap<String, String>,
    /// The stamped pack, when the batch touched it
    pub pack: Option<String>,
}

impl Resolution {
    pub fn writes(&self) -> Vec<FileWrite> {
        self.files
            .iter()
            .map(|(path, content)| FileWrite {
                path: path.clone(),
                content: content.clone(),
            })
            .collect()
    }
}

/// A confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub commit_id: String,
    pub attempts: u32,
}

pub struct CommitCoordinator {
    store: Arc<dyn RemoteStore>,
    rules: PathRules,
    max_content_bytes: usize,
    retry: RetryConfig,
    pack_path: String,
}

impl CommitCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>, config: &CtxpackConfig) -> Self {
        Self {
            store,
            rules: config.path_rules(),
            max_content_bytes: config.documents.max_content_bytes,
            retry: config.retry.clone(),
            pack_path: config.pack_store_path(),
        }
    }

    pub fn rules(&self) -> &PathRules {
        &self.rules
    }

    pub fn max_content_bytes(&self) -> usize {
        self.max_content_bytes
    }

    pub fn pack_path(&self) -> &str {
        &self.pack_path
    }

    /// Validate the whole batch. Any rejection rejects the batch.
    pub fn validate(&self, intents: &[WriteIntent]) -> Result<Vec<ValidatedIntent>> {
        let batch = validate_batch(intents, &self.rules, self.max_content_bytes);
        if !batch.is_valid() {
            for rejected in &batch.invalid {
                warn!(
                    index = rejected.index,
                    path = %rejected.intent.path,
                    reason = %rejected.reason,
                    "Rejected write intent"
                );
            }
            return Err(Error::InvalidBatch {
                total: intents.len(),
                rejected: batch.invalid,
            });
        }
        Ok(batch.valid)
    }

    /// Resolve validated intents against current content.
    ///
    /// The pack starts from `cached_pack` (already validated against `head`);
    /// other files are read from the store once per batch, missing ones start
    /// empty. If the pack is written it is restamped with direction
    /// `decompose` and `source_ref = head`.
    pub async fn resolve(
        &self,
        intents: &[ValidatedIntent],
        cached_pack: Option<&str>,
        head: &str,
    ) -> Result<Resolution> {
        let mut working: BTreeMap<String, String> = BTreeMap::new();
        let mut fetched: HashMap<String, Option<FileContent>> = HashMap::new();

        for intent in intents {
            if let Some(expected) = &intent.base_ref_sha {
                let current = self.fetch(&mut fetched, &intent.path).await?;
                let actual = current.as_ref().map(|f| f.sha.as_str());
                if actual != Some(expected.as_str()) {
                    warn!(
                        path = %intent.path,
                        expected = %expected,
                        actual = actual.unwrap_or("<missing>"),
                        "Intent based on a stale blob, applying to current content"
                    );
                }
            }

            let base = match working.get(&intent.path) {
                Some(content) => Some(content.clone()),
                None if matches!(intent.edit, Edit::Put { .. }) => None,
                None if intent.path == self.pack_path => cached_pack.map(str::to_string),
                None => self
                    .fetch(&mut fetched, &intent.path)
                    .await?
                    .map(|f| f.content),
            };

            let resolved = ctxpack_tools::apply_edit(base.as_deref(), &intent.edit).map_err(
                |source| Error::Patch {
                    path: intent.path.clone(),
                    source,
                },
            )?;
            debug!(path = %intent.path, bytes = resolved.len(), "Resolved intent");
            working.insert(intent.path.clone(), resolved);
        }

        let mut pack = None;
        if let Some(content) = working.get_mut(&self.pack_path) {
            let cleaned = drop_filled_placeholders(content);
            let (stamped, stamp) = VersionStamp::apply(&cleaned, head, Direction::Decompose);
            debug!(hash = %stamp.content_hash, source_ref = head, "Restamped context pack");
            *content = stamped.clone();
            pack = Some(stamped);
        }

        Ok(Resolution {
            files: working,
            pack,
        })
    }

    async fn fetch(
        &self,
        fetched: &mut HashMap<String, Option<FileContent>>,
        path: &str,
    ) -> Result<Option<FileContent>> {
        if let Some(file) = fetched.get(path) {
            return Ok(file.clone());
        }
        let file = self.store.read_file(path).await?;
        fetched.insert(path.to_string(), file.clone());
        Ok(file)
    }

    /// Submit files as one commit, retrying reference conflicts.
    pub async fn submit(&self, files: &[FileWrite], message: &str) -> Result<Submitted> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.commit_files(files, message).await {
                Ok(commit_id) => {
                    info!(
                        store = self.store.name(),
                        commit = %commit_id,
                        files = files.len(),
                        attempts = attempt,
                        "Commit applied"
                    );
                    return Ok(Submitted {
                        commit_id,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_ref_conflict() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reference conflict, retrying commit"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Commit failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Resolve and submit a validated batch.
    pub async fn execute(
        &self,
        intents: &[ValidatedIntent],
        cached_pack: Option<&str>,
        head: &str,
        message: &str,
    ) -> Result<(Resolution, Submitted)> {
        let resolution = self.resolve(intents, cached_pack, head).await?;
        let submitted = self.submit(&resolution.writes(), message).await?;
        Ok((resolution, submitted))
    }
}

/// Default commit message for a batch.
pub fn commit_message(paths: &[String]) -> String {
    match paths {
        [] => "ctxpack: no changes".to_string(),
        [one] => format!("ctxpack: update {one}"),
        many => format!("ctxpack: update {} files\n\n{}", many.len(), many.join("\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpack_core::error::PatchError;
    use ctxpack_core::intent::PatchOp;
    use ctxpack_core::pack::strip_stamp;
    use ctxpack_store::{InMemoryStore, content_sha};

    fn config() -> CtxpackConfig {
        let mut config = CtxpackConfig::default();
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 40;
        config
    }

    fn coordinator(store: &Arc<InMemoryStore>) -> CommitCoordinator {
        CommitCoordinator::new(store.clone(), &config())
    }

    fn append(path: &str, heading: &str, content: &str) -> WriteIntent {
        WriteIntent::patch(
            path,
            PatchOp::Append {
                heading: heading.into(),
                content: content.into(),
            },
        )
    }

    #[test]
    fn invalid_batch_reports_every_reason() {
        let store = Arc::new(InMemoryStore::new());
        let err = coordinator(&store)
            .validate(&[
                WriteIntent::put("data/plans/weekly.md", "ok"),
                WriteIntent::put("data/identity/mission.md", "nope"),
                WriteIntent::put("data/../secrets", "nope"),
            ])
            .unwrap_err();
        match err {
            Error::InvalidBatch { total, rejected } => {
                assert_eq!(total, 3);
                let indices: Vec<usize> = rejected.iter().map(|r| r.index).collect();
                assert_eq!(indices, vec![1, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn patches_to_one_file_compose_in_order() {
        let store = Arc::new(InMemoryStore::with_files([(
            "data/plans/weekly.md",
            "## Week\n- [ ] ship\n",
        )]));
        let coordinator = coordinator(&store);
        let intents = coordinator
            .validate(&[
                append("data/plans/weekly.md", "## Week", "- [ ] review"),
                WriteIntent::patch(
                    "data/plans/weekly.md",
                    PatchOp::MarkComplete {
                        item: "ship".into(),
                    },
                ),
            ])
            .unwrap();

        let resolution = coordinator.resolve(&intents, None, "c0").await.unwrap();
        assert_eq!(
            resolution.files["data/plans/weekly.md"],
            "## Week\n- [x] ship\n- [ ] review\n"
        );
        assert!(resolution.pack.is_none());
    }

    #[tokio::test]
    async fn put_then_patch_starts_from_put_content() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(&store);
        let intents = coordinator
            .validate(&[
                WriteIntent::put("data/notes.md", "## Log\n"),
                append("data/notes.md", "## Log", "- first"),
            ])
            .unwrap();
        let resolution = coordinator.resolve(&intents, None, "c0").await.unwrap();
        assert_eq!(resolution.files["data/notes.md"], "## Log\n- first\n");
    }

    #[tokio::test]
    async fn patch_on_missing_file_starts_empty() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(&store);
        let intents = coordinator
            .validate(&[append("data/context_pack.md", "## Captures", "- 10:00 | note")])
            .unwrap();
        let resolution = coordinator.resolve(&intents, None, "c0").await.unwrap();

        let pack = resolution.pack.unwrap();
        assert_eq!(strip_stamp(&pack), "## Captures\n- 10:00 | note\n");
        let stamp = VersionStamp::find(&pack).unwrap();
        assert_eq!(stamp.direction, Direction::Decompose);
        assert_eq!(stamp.source_ref, "c0");
    }

    #[tokio::test]
    async fn pack_patch_starts_from_cached_copy() {
        let store = Arc::new(InMemoryStore::with_files([(
            "data/context_pack.md",
            "# Context Pack\n\n## Captures\n- stale\n",
        )]));
        let coordinator = coordinator(&store);
        let cached = "# Context Pack\n\n## Captures\n- cached\n";
        let intents = coordinator
            .validate(&[append("data/context_pack.md", "## Captures", "- new")])
            .unwrap();
        let resolution = coordinator
            .resolve(&intents, Some(cached), "c0")
            .await
            .unwrap();
        assert_eq!(
            strip_stamp(&resolution.pack.unwrap()),
            "# Context Pack\n\n## Captures\n- cached\n- new\n"
        );
    }

    #[tokio::test]
    async fn patch_error_aborts_resolution() {
        let store = Arc::new(InMemoryStore::with_files([("data/a.md", "## A\n- x\n")]));
        let coordinator = coordinator(&store);
        let intents = coordinator
            .validate(&[
                WriteIntent::put("data/b.md", "fine"),
                WriteIntent::patch(
                    "data/a.md",
                    PatchOp::RemoveItem {
                        item: "- missing".into(),
                    },
                ),
            ])
            .unwrap();
        let err = coordinator.resolve(&intents, None, "c0").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Patch {
                source: PatchError::ItemNotFound { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stale_base_ref_still_applies() {
        let store = Arc::new(InMemoryStore::with_files([("data/a.md", "## A\n")]));
        let coordinator = coordinator(&store);
        let intents = coordinator
            .validate(&[append("data/a.md", "## A", "- x").with_base_ref("deadbeef")])
            .unwrap();
        let resolution = coordinator.resolve(&intents, None, "c0").await.unwrap();
        assert_eq!(resolution.files["data/a.md"], "## A\n- x\n");

        let fresh = coordinator
            .validate(&[append("data/a.md", "## A", "- y").with_base_ref(content_sha("## A\n"))])
            .unwrap();
        assert!(coordinator.resolve(&fresh, None, "c0").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_then_success_commits_first_resolution() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(&store);
        let intents = coordinator
            .validate(&[WriteIntent::put("data/a.md", "first")])
            .unwrap();
        let resolution = coordinator.resolve(&intents, None, "c0").await.unwrap();

        store.inject_conflicts(1).await;
        let submitted = coordinator
            .submit(&resolution.writes(), "update")
            .await
            .unwrap();
        assert_eq!(submitted.attempts, 2);
        assert_eq!(store.file("data/a.md").await.as_deref(), Some("first"));
        assert_eq!(store.commits().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_exhaust_attempt_budget() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = coordinator(&store);
        store.inject_conflicts(10).await;

        let err = coordinator
            .submit(
                &[FileWrite {
                    path: "data/a.md".into(),
                    content: "x".into(),
                }],
                "update",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(ref e) if e.is_ref_conflict()));
        assert_eq!(store.conflicts_raised().await, 4);
        assert!(store.file("data/a.md").await.is_none());
    }

    #[test]
    fn commit_messages() {
        assert_eq!(commit_message(&["data/a.md".into()]), "ctxpack: update data/a.md");
        let many = commit_message(&["data/a.md".into(), "data/b.md".into()]);
        assert!(many.starts_with("ctxpack: update 2 files"));
        assert!(many.contains("data/b.md"));
    }
}

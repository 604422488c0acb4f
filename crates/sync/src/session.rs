//! Pack session — the sync object for one user-facing entity.
//!
//! A session owns its store handles, configuration and pack cache. Every
//! mutating operation takes `&mut self`, so requests against one object are
//! processed strictly one at a time; different sessions are independent.

use std::sync::Arc;

use chrono::Utc;
use ctxpack_config::CtxpackConfig;
use ctxpack_core::error::{Error, Result};
use ctxpack_core::intent::{Edit, ValidatedIntent, WriteIntent};
use ctxpack_core::pack::{Direction, VersionStamp, strip_stamp};
use ctxpack_core::store::{FileWrite, RemoteStore, StateStorage};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{assemble, collect_sources};
use crate::cache::PackCache;
use crate::coordinator::{CommitCoordinator, CommitReceipt, commit_message};
use crate::decompose::{
    DecomposeOutcome, DecomposeStatus, SkipReason, SkippedSection, plan,
};
use crate::prune::{PruneReport, Pruner};

/// Result of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// `None` when the assembled pack matched the current one
    pub commit_id: Option<String>,
    pub stamp: VersionStamp,
    /// Root-relative sources that do not exist yet
    pub missing: Vec<String>,
    pub attempts: u32,
    /// Pending pack edits were decomposed before rebuilding
    pub decomposed: bool,
}

/// Snapshot of a session's view of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackStatus {
    pub object: String,
    pub store: String,
    pub branch: String,
    pub head: String,
    pub pack_path: String,
    pub pack_bytes: Option<usize>,
    pub stamp: Option<VersionStamp>,
    /// Whether the embedded hash matches the pack content
    pub stamp_valid: bool,
    /// Direction is `decompose` and no completion marker exists
    pub decompose_pending: bool,
}

pub struct PackSession {
    object: String,
    config: CtxpackConfig,
    store: Arc<dyn RemoteStore>,
    state: Arc<dyn StateStorage>,
    coordinator: CommitCoordinator,
    cache: PackCache,
}

impl PackSession {
    pub fn new(
        object: impl Into<String>,
        config: CtxpackConfig,
        store: Arc<dyn RemoteStore>,
        state: Arc<dyn StateStorage>,
    ) -> Self {
        let coordinator = CommitCoordinator::new(store.clone(), &config);
        let cache = PackCache::new(config.pack_store_path());
        Self {
            object: object.into(),
            config,
            store,
            state,
            coordinator,
            cache,
        }
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn config(&self) -> &CtxpackConfig {
        &self.config
    }

    /// Atomically apply a batch of write intents.
    ///
    /// Either every intent lands in one commit or nothing is written.
    pub async fn commit(&mut self, intents: &[WriteIntent]) -> Result<CommitReceipt> {
        let validated = self.coordinator.validate(intents)?;
        if validated.is_empty() {
            return Ok(CommitReceipt::empty());
        }

        let mut paths: Vec<String> = validated.iter().map(|i| i.path.clone()).collect();
        paths.sort();
        paths.dedup();
        let message = commit_message(&paths);

        let receipt = self.commit_validated(&validated, &message).await?;
        info!(
            object = %self.object,
            commit = receipt.commit_id.as_deref().unwrap_or(""),
            files = receipt.files.len(),
            attempts = receipt.attempts,
            "Batch committed"
        );
        Ok(receipt)
    }

    async fn commit_validated(
        &mut self,
        validated: &[ValidatedIntent],
        message: &str,
    ) -> Result<CommitReceipt> {
        let head = self.store.head().await?;
        let pack_path = self.coordinator.pack_path().to_string();

        // A put replaces the pack outright, so only patches need the cache
        let needs_pack = validated
            .iter()
            .any(|i| i.path == pack_path && matches!(i.edit, Edit::Patch(_)));
        let cached = if needs_pack {
            self.cache
                .ensure_fresh(self.store.as_ref(), self.state.as_ref(), &head)
                .await?
        } else {
            None
        };

        let (resolution, submitted) = self
            .coordinator
            .execute(validated, cached.as_deref(), &head, message)
            .await?;

        if let Some(pack) = resolution.pack.clone() {
            self.cache
                .update(self.state.as_ref(), pack, &submitted.commit_id)
                .await;
        }

        let mut truncated: Vec<String> = validated
            .iter()
            .filter(|i| i.truncated)
            .map(|i| i.path.clone())
            .collect();
        truncated.dedup();

        Ok(CommitReceipt {
            commit_id: Some(submitted.commit_id),
            files: resolution.files.into_keys().collect(),
            attempts: submitted.attempts,
            truncated,
        })
    }

    /// The current pack, validated against the store head.
    pub async fn pack(&mut self) -> Result<Option<String>> {
        let head = self.store.head().await?;
        self.cache
            .ensure_fresh(self.store.as_ref(), self.state.as_ref(), &head)
            .await
    }

    /// Regenerate the pack from its canonical sources and commit it.
    ///
    /// Pack edits that were never decomposed are written back to their
    /// sources first, so the rebuild cannot revert them.
    pub async fn rebuild(&mut self) -> Result<RebuildReport> {
        let decomposed = self.decompose_pending().await?;
        if decomposed {
            info!(object = %self.object, "Decomposing pending pack edits before rebuild");
            self.decompose().await?;
        }

        let head = self.store.head().await?;
        let previous = self
            .cache
            .ensure_fresh(self.store.as_ref(), self.state.as_ref(), &head)
            .await?;

        let previous_stamp = previous.as_deref().and_then(VersionStamp::find);

        let layout = &self.config.pack;
        let rules = self.coordinator.rules();
        let sources = collect_sources(self.store.as_ref(), layout, rules).await?;
        let assembled = assemble(layout, &sources, previous.as_deref());

        if let (Some(prev), Some(stamp)) = (previous.as_deref(), &previous_stamp)
            && stamp.direction == Direction::Build
            && strip_stamp(prev) == assembled.body
        {
            info!(object = %self.object, hash = %stamp.content_hash, "Pack already current");
            return Ok(RebuildReport {
                commit_id: None,
                stamp: stamp.clone(),
                missing: assembled.missing,
                attempts: 0,
                decomposed,
            });
        }

        let (pack, stamp) = VersionStamp::apply(&assembled.body, &head, Direction::Build);
        let pack_path = self.coordinator.pack_path().to_string();
        let submitted = self
            .coordinator
            .submit(
                &[FileWrite {
                    path: pack_path,
                    content: pack.clone(),
                }],
                &format!("ctxpack: rebuild context pack {}", stamp.content_hash),
            )
            .await?;
        self.cache
            .update(self.state.as_ref(), pack, &submitted.commit_id)
            .await;

        info!(
            object = %self.object,
            commit = %submitted.commit_id,
            hash = %stamp.content_hash,
            missing = assembled.missing.len(),
            "Context pack rebuilt"
        );
        Ok(RebuildReport {
            commit_id: Some(submitted.commit_id),
            stamp,
            missing: assembled.missing,
            attempts: submitted.attempts,
            decomposed,
        })
    }

    /// Write edited pack sections back to their canonical files.
    ///
    /// Runs at most once per stamp hash; later calls are no-ops.
    pub async fn decompose(&mut self) -> Result<DecomposeOutcome> {
        let pack_path = self.coordinator.pack_path().to_string();
        let pack = self
            .pack()
            .await?
            .ok_or_else(|| Error::Pack(format!("no context pack at {pack_path}")))?;

        let Some(stamp) = VersionStamp::find(&pack) else {
            warn!(object = %self.object, "Context pack has no version stamp, skipping decompose");
            return Ok(DecomposeOutcome::nothing(DecomposeStatus::Unstamped, None));
        };
        let hash = stamp.content_hash.clone();

        if stamp.direction == Direction::Build {
            info!(
                object = %self.object,
                hash = %hash,
                "Pack was built from sources, nothing to decompose"
            );
            return Ok(DecomposeOutcome::nothing(DecomposeStatus::BuiltFromSources, Some(hash)));
        }
        if let Some(at) = self.state.marker(&hash).await? {
            info!(
                object = %self.object,
                hash = %hash,
                %at,
                "Decompose already done for this stamp"
            );
            return Ok(DecomposeOutcome::nothing(DecomposeStatus::AlreadyDone { at }, Some(hash)));
        }

        let plan = plan(&pack);
        let mut skipped = plan.skipped;
        let mut intents = Vec::new();
        for write in plan.writes {
            let path = self.coordinator.rules().resolve(&write.path);
            let intent = WriteIntent::put(&path, write.content.as_str());
            match intent.validate(self.coordinator.rules(), self.coordinator.max_content_bytes()) {
                Ok(valid) => {
                    let current = self.store.read_file(&path).await?;
                    if current.is_some_and(|f| f.content == write.content) {
                        skipped.push(SkippedSection {
                            heading: write.heading,
                            reason: SkipReason::Unchanged,
                        });
                    } else {
                        intents.push(valid);
                    }
                }
                Err(reason) => {
                    warn!(
                        heading = %write.heading,
                        path = %path,
                        reason = %reason,
                        "Skipping section with a rejected target"
                    );
                    skipped.push(SkippedSection {
                        heading: write.heading,
                        reason: SkipReason::Rejected(reason),
                    });
                }
            }
        }

        let mut outcome = DecomposeOutcome::nothing(DecomposeStatus::Applied, Some(hash.clone()));
        if !intents.is_empty() {
            let receipt = self
                .commit_validated(
                    &intents,
                    &format!("ctxpack: decompose context pack {hash}"),
                )
                .await?;
            outcome.commit_id = receipt.commit_id;
            outcome.written = receipt.files;
        }
        outcome.skipped = skipped;

        self.state.write_marker(&hash, Utc::now()).await?;
        info!(
            object = %self.object,
            hash = %hash,
            written = outcome.written.len(),
            skipped = outcome.skipped.len(),
            "Context pack decomposed"
        );
        Ok(outcome)
    }

    /// The current pack, pruned to `budget` bytes (config default if `None`).
    pub async fn pruned_pack(
        &mut self,
        budget: Option<usize>,
    ) -> Result<Option<(String, PruneReport)>> {
        let budget = budget.unwrap_or(self.config.prune.budget_chars);
        let Some(pack) = self.pack().await? else {
            return Ok(None);
        };
        let (pruned, report) = Pruner::new(&self.config.prune).prune(&pack, budget);
        if report.pruned() {
            info!(
                object = %self.object,
                budget,
                original = report.original_len,
                pruned = report.final_len,
                steps = ?report.steps,
                "Context pack pruned"
            );
        }
        Ok(Some((pruned, report)))
    }

    /// Whether the current pack carries edits not yet written back.
    async fn decompose_pending(&mut self) -> Result<bool> {
        let stamp = self.pack().await?.as_deref().and_then(VersionStamp::find);
        self.marker_missing(stamp.as_ref()).await
    }

    async fn marker_missing(&self, stamp: Option<&VersionStamp>) -> Result<bool> {
        match stamp {
            Some(s) if s.direction == Direction::Decompose => {
                Ok(self.state.marker(&s.content_hash).await?.is_none())
            }
            _ => Ok(false),
        }
    }

    /// Describe the pack as currently stored.
    pub async fn status(&mut self) -> Result<PackStatus> {
        let head = self.store.head().await?;
        let pack = self
            .cache
            .ensure_fresh(self.store.as_ref(), self.state.as_ref(), &head)
            .await?;

        let stamp = pack.as_deref().and_then(VersionStamp::find);
        let stamp_valid = pack.as_deref().is_some_and(VersionStamp::verify);
        let decompose_pending = self.marker_missing(stamp.as_ref()).await?;

        Ok(PackStatus {
            object: self.object.clone(),
            store: self.store.name().to_string(),
            branch: self.store.branch().to_string(),
            head,
            pack_path: self.coordinator.pack_path().to_string(),
            pack_bytes: pack.as_ref().map(String::len),
            stamp,
            stamp_valid,
            decompose_pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxpack_core::intent::PatchOp;
    use ctxpack_core::pack::INLINE_MARKER;
    use ctxpack_store::{InMemoryStateStorage, InMemoryStore};

    const PACK: &str = "data/context_pack.md";

    fn session(store: &Arc<InMemoryStore>) -> PackSession {
        let mut config = CtxpackConfig::default();
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 4;
        PackSession::new(
            "alice",
            config,
            store.clone(),
            Arc::new(InMemoryStateStorage::new()),
        )
    }

    fn capture(text: &str) -> WriteIntent {
        WriteIntent::patch(
            PACK,
            PatchOp::Append {
                heading: "## Captures".into(),
                content: text.into(),
            },
        )
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let receipt = session(&store).commit(&[]).await.unwrap();
        assert_eq!(receipt, CommitReceipt::empty());
        assert!(store.commits().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_intent_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let err = session(&store)
            .commit(&[
                WriteIntent::put("data/plans/weekly.md", "- ship\n"),
                WriteIntent::put("data/identity/values.md", "rewrite"),
            ])
            .await
            .unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("data/identity/values.md"));
        assert!(store.commits().await.is_empty());
        assert!(store.file("data/plans/weekly.md").await.is_none());
    }

    #[tokio::test]
    async fn multi_file_batch_is_one_commit() {
        let store = Arc::new(InMemoryStore::new());
        let receipt = session(&store)
            .commit(&[
                WriteIntent::put("data/plans/weekly.md", "- ship\n"),
                capture("- 10:00 | note"),
            ])
            .await
            .unwrap();
        assert_eq!(receipt.commit_id.as_deref(), Some("c1"));
        assert_eq!(receipt.files, vec![PACK.to_string(), "data/plans/weekly.md".into()]);

        let commits = store.commits().await;
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].files.len(), 2);

        let pack = store.file(PACK).await.unwrap();
        let stamp = VersionStamp::find(&pack).unwrap();
        assert_eq!(stamp.direction, Direction::Decompose);
        assert_eq!(stamp.source_ref, "c0");
        assert!(VersionStamp::verify(&pack));
    }

    #[tokio::test]
    async fn consecutive_commits_reuse_cached_pack() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = session(&store);
        session.commit(&[capture("- one")]).await.unwrap();
        session.commit(&[capture("- two")]).await.unwrap();

        let pack = store.file(PACK).await.unwrap();
        assert_eq!(strip_stamp(&pack), "## Captures\n- one\n- two\n");
        assert_eq!(VersionStamp::find(&pack).unwrap().source_ref, "c1");
    }

    #[tokio::test]
    async fn external_pack_edit_is_picked_up() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = session(&store);
        session.commit(&[capture("- one")]).await.unwrap();
        store
            .external_commit(PACK, "## Captures\n- edited elsewhere\n")
            .await;

        session.commit(&[capture("- two")]).await.unwrap();
        let pack = store.file(PACK).await.unwrap();
        assert_eq!(
            strip_stamp(&pack),
            "## Captures\n- edited elsewhere\n- two\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn conflict_is_retried_transparently() {
        let store = Arc::new(InMemoryStore::new());
        store.inject_conflicts(2).await;
        let receipt = session(&store)
            .commit(&[capture("- retried")])
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(store.commits().await.len(), 1);
    }

    #[tokio::test]
    async fn rebuild_then_decompose_is_noop() {
        let store = Arc::new(InMemoryStore::with_files([
            ("data/plans/weekly.md", "- ship\n"),
            ("data/identity/mission.md", "Calm tools.\n"),
        ]));
        let mut session = session(&store);

        let report = session.rebuild().await.unwrap();
        assert_eq!(report.commit_id.as_deref(), Some("c1"));
        assert_eq!(report.stamp.direction, Direction::Build);
        assert!(report.missing.contains(&"plans/monthly.md".to_string()));

        let pack = store.file(PACK).await.unwrap();
        assert!(pack.contains("## Weekly Plan\n<!-- Source: plans/weekly.md -->\n- ship\n"));
        assert!(pack.contains(&format!("## Captures\n{INLINE_MARKER}\n_(nothing here yet)_\n")));

        let outcome = session.decompose().await.unwrap();
        assert_eq!(outcome.status, DecomposeStatus::BuiltFromSources);
    }

    #[tokio::test]
    async fn placeholders_never_reach_sources_or_carry_forward() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = session(&store);
        session.rebuild().await.unwrap();
        session
            .commit(&[
                WriteIntent::patch(
                    PACK,
                    PatchOp::Append {
                        heading: "## Daily Stream".into(),
                        content: "- 10:00 | note".into(),
                    },
                ),
                capture("- 10:00 | cap"),
            ])
            .await
            .unwrap();

        let pack = store.file(PACK).await.unwrap();
        assert!(!pack.contains("_(empty: stream/daily.md does not exist yet)_"));
        assert!(pack.contains(&format!("## Captures\n{INLINE_MARKER}\n- 10:00 | cap\n")));

        let outcome = session.decompose().await.unwrap();
        assert_eq!(outcome.written, vec!["data/stream/daily.md".to_string()]);
        assert_eq!(
            store.file("data/stream/daily.md").await.as_deref(),
            Some("- 10:00 | note\n")
        );
        assert!(store.file("data/plans/weekly.md").await.is_none());

        session.rebuild().await.unwrap();
        let pack = store.file(PACK).await.unwrap();
        assert!(pack.contains(&format!("## Captures\n{INLINE_MARKER}\n- 10:00 | cap\n")));
        assert!(pack.contains("<!-- Source: stream/daily.md -->\n- 10:00 | note\n"));
    }

    #[tokio::test]
    async fn rebuild_decomposes_pending_edits_first() {
        let store = Arc::new(InMemoryStore::with_files([(
            "data/plans/weekly.md",
            "- [ ] ship\n",
        )]));
        let mut session = session(&store);
        session.rebuild().await.unwrap();
        session
            .commit(&[WriteIntent::patch(
                PACK,
                PatchOp::MarkComplete {
                    item: "ship".into(),
                },
            )])
            .await
            .unwrap();

        let report = session.rebuild().await.unwrap();
        assert!(report.decomposed);
        assert!(report.commit_id.is_some());
        assert_eq!(
            store.file("data/plans/weekly.md").await.as_deref(),
            Some("- [x] ship\n")
        );
        let pack = store.file(PACK).await.unwrap();
        assert!(pack.contains("- [x] ship\n"));
        assert_eq!(VersionStamp::find(&pack).unwrap().direction, Direction::Build);
        assert!(!session.status().await.unwrap().decompose_pending);
    }

    #[tokio::test]
    async fn rebuild_is_skipped_when_current() {
        let store = Arc::new(InMemoryStore::with_files([("data/plans/weekly.md", "- ship\n")]));
        let mut session = session(&store);
        session.rebuild().await.unwrap();
        let again = session.rebuild().await.unwrap();
        assert!(again.commit_id.is_none());
        assert_eq!(store.commits().await.len(), 1);
    }

    #[tokio::test]
    async fn edited_pack_decomposes_once() {
        let store = Arc::new(InMemoryStore::with_files([
            ("data/plans/weekly.md", "- ship\n"),
            ("data/stream/daily.md", "- 08:00 | up\n"),
        ]));
        let mut session = session(&store);
        session.rebuild().await.unwrap();

        session
            .commit(&[WriteIntent::patch(
                PACK,
                PatchOp::Append {
                    heading: "## Weekly Plan".into(),
                    content: "- review".into(),
                },
            )])
            .await
            .unwrap();

        let first = session.decompose().await.unwrap();
        assert_eq!(first.status, DecomposeStatus::Applied);
        assert_eq!(first.written, vec!["data/plans/weekly.md".to_string()]);
        assert_eq!(
            store.file("data/plans/weekly.md").await.as_deref(),
            Some("- ship\n- review\n")
        );
        assert!(
            first
                .skipped
                .iter()
                .any(|s| s.heading == "## Daily Stream" && s.reason == SkipReason::Unchanged)
        );

        let commits_after_first = store.commits().await.len();
        let second = session.decompose().await.unwrap();
        assert!(matches!(second.status, DecomposeStatus::AlreadyDone { .. }));
        assert_eq!(store.commits().await.len(), commits_after_first);
    }

    #[tokio::test]
    async fn decompose_without_pack_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let err = session(&store).decompose().await.unwrap_err();
        assert!(matches!(err, Error::Pack(_)));
    }

    #[tokio::test]
    async fn status_reports_pending_decompose() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = session(&store);
        session.commit(&[capture("- note")]).await.unwrap();

        let status = session.status().await.unwrap();
        assert_eq!(status.head, "c1");
        assert!(status.stamp_valid);
        assert!(status.decompose_pending);

        session.decompose().await.unwrap();
        assert!(!session.status().await.unwrap().decompose_pending);
    }

    #[tokio::test]
    async fn pruned_pack_uses_budget() {
        let store = Arc::new(InMemoryStore::new());
        let mut session = session(&store);
        assert!(session.pruned_pack(Some(10)).await.unwrap().is_none());

        session
            .commit(&[capture(&"- a long capture line\n".repeat(20))])
            .await
            .unwrap();
        let (pruned, report) = session.pruned_pack(Some(120)).await.unwrap().unwrap();
        assert!(pruned.len() <= 120);
        assert!(report.pruned());
    }
}

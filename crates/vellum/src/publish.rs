//! Publish engine
//!
//! Promotes offline changes into the online view. A call computes its
//! candidate set, takes one publish tag, filters candidates by ownership,
//! locks and parent presence, and commits the survivors one at a time
//! under their commit guard.

use crate::entities::{Context, Resource, ResourceId, View};
use crate::error::{Result, VellumError};
use crate::lock::unpoisoned;
use crate::path::ResourcePath;
use crate::report::{NullReport, PublishOutcome, PublishReport, ReportEntry, ReportSink};
use crate::repository::Repository;
use crate::state::{NextState, ResourceState, Transition};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// What a publish call covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// One resource, optionally with its sibling group
    Resource { path: String, include_siblings: bool },
    /// Every resource owned by the calling project
    Project,
}

impl PublishTarget {
    pub fn resource(path: impl Into<String>) -> Self {
        PublishTarget::Resource {
            path: path.into(),
            include_siblings: false,
        }
    }

    pub fn resource_with_siblings(path: impl Into<String>) -> Self {
        PublishTarget::Resource {
            path: path.into(),
            include_siblings: true,
        }
    }
}

/// Cooperative cancellation, checked between candidates
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct PublishOptions {
    /// Publish siblings regardless of their owning project. Implies
    /// including siblings; locks still apply.
    pub cascade_all_siblings: bool,
    /// Bring the offline subtree of a published folder along
    pub include_subtree: bool,
    pub report: Arc<dyn ReportSink>,
    pub cancel: CancelFlag,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            cascade_all_siblings: false,
            include_subtree: false,
            report: Arc::new(NullReport),
            cancel: CancelFlag::new(),
        }
    }
}

impl fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishOptions")
            .field("cascade_all_siblings", &self.cascade_all_siblings)
            .field("include_subtree", &self.include_subtree)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cascade_all_siblings(mut self, cascade: bool) -> Self {
        self.cascade_all_siblings = cascade;
        self
    }

    pub fn include_subtree(mut self, include: bool) -> Self {
        self.include_subtree = include;
        self
    }

    pub fn report(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.report = sink;
        self
    }

    pub fn cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }
}

/// Candidates of one call; `bypass_ownership` holds siblings pulled in by
/// `cascade_all_siblings`
struct Candidates {
    ids: Vec<ResourceId>,
    bypass_ownership: HashSet<ResourceId>,
}

impl Repository {
    /// Publish offline changes of the calling project.
    ///
    /// Skips and per-resource failures are reported, not raised. A
    /// storage fault while writing aborts the remaining candidates;
    /// whatever was committed before stays committed.
    pub async fn publish(
        &self,
        ctx: &Context,
        target: PublishTarget,
        options: PublishOptions,
    ) -> Result<PublishReport> {
        let project = self.project(&ctx.project)?;
        if project.is_online() {
            return Err(VellumError::ReadOnlyProject(project.name));
        }
        if !self.inner.permissions.can_publish(&ctx.actor, &project) {
            return Err(VellumError::PermissionDenied(format!(
                "{} may not publish project {}",
                ctx.actor, project.name
            )));
        }

        let candidates = self.publish_candidates(ctx, &target, &options)?;
        let ordered = self.publish_order(&candidates.ids);
        let tag = self.inner.history.next_tag().await?;
        info!(
            tag,
            project = %project.name,
            actor = %ctx.actor,
            candidates = ordered.len(),
            "Publishing"
        );

        let mut report = PublishReport::new(tag);
        for id in ordered {
            if options.cancel.is_cancelled() {
                report.cancelled = true;
                warn!(tag, processed = report.entries.len(), "Publish cancelled");
                break;
            }

            let _guard = self.inner.guards.lock(id).await;
            let Some(record) = self.record_by_id(View::Offline, &id) else {
                continue;
            };
            if record.state == ResourceState::Unchanged {
                continue;
            }

            let (outcome, detail) = match self.publish_filter(ctx, &record, &candidates) {
                Some(skip) => skip,
                None => match self.commit_publish(ctx, &record, tag).await {
                    Ok(outcome) => (outcome, None),
                    Err(e) if e.is_fatal() => {
                        let detail = e.to_string();
                        options
                            .report
                            .append(PublishOutcome::Error, &record.path, Some(&detail));
                        warn!(tag, path = %record.path, error = %detail, "Publish aborted");
                        return Err(e);
                    }
                    Err(e) => (PublishOutcome::Error, Some(e.to_string())),
                },
            };

            options
                .report
                .append(outcome, &record.path, detail.as_deref());
            report.entries.push(ReportEntry {
                path: record.path,
                resource_id: record.id,
                outcome,
                detail,
            });
        }

        info!(
            tag,
            published = report.published(),
            deleted = report.deleted(),
            skipped = report.skipped(),
            errors = report.errors(),
            cancelled = report.cancelled,
            "Publish finished"
        );
        Ok(report)
    }

    fn publish_candidates(
        &self,
        ctx: &Context,
        target: &PublishTarget,
        options: &PublishOptions,
    ) -> Result<Candidates> {
        let mut candidates = Candidates {
            ids: Vec::new(),
            bypass_ownership: HashSet::new(),
        };

        match target {
            PublishTarget::Project => {
                candidates.ids = self.inner.projects.owned_by(&ctx.project);
            }
            PublishTarget::Resource {
                path,
                include_siblings,
            } => {
                let record = self.require(View::Offline, &ResourcePath::parse(path)?)?;
                let mut scope = vec![record.clone()];
                if options.include_subtree && record.is_folder() {
                    let directory = unpoisoned(&self.inner.directory);
                    scope.extend(
                        directory
                            .descendants(View::Offline, &record.path)
                            .into_iter()
                            .cloned(),
                    );
                }
                candidates.ids = scope.iter().map(|r| r.id).collect();

                if *include_siblings || options.cascade_all_siblings {
                    for file in scope.iter().filter(|r| !r.is_folder()) {
                        for sibling in self.group_of(file) {
                            if candidates.ids.contains(&sibling) {
                                continue;
                            }
                            candidates.ids.push(sibling);
                            if options.cascade_all_siblings {
                                candidates.bypass_ownership.insert(sibling);
                            }
                        }
                    }
                }
            }
        }

        let directory = unpoisoned(&self.inner.directory);
        candidates.ids.retain(|id| {
            directory
                .get_by_id(View::Offline, id)
                .is_some_and(|r| r.state.is_pending())
        });
        Ok(candidates)
    }

    /// Live resources by ascending path, then deletions by descending path
    fn publish_order(&self, ids: &[ResourceId]) -> Vec<ResourceId> {
        let directory = unpoisoned(&self.inner.directory);
        let (mut deleted, mut live): (Vec<&Resource>, Vec<&Resource>) = ids
            .iter()
            .filter_map(|id| directory.get_by_id(View::Offline, id))
            .partition(|r| r.state == ResourceState::Deleted);
        live.sort_by(|a, b| a.path.cmp(&b.path));
        deleted.sort_by(|a, b| b.path.cmp(&a.path));
        live.into_iter().chain(deleted).map(|r| r.id).collect()
    }

    /// The skip outcome for `record`, if any
    fn publish_filter(
        &self,
        ctx: &Context,
        record: &Resource,
        candidates: &Candidates,
    ) -> Option<(PublishOutcome, Option<String>)> {
        if record.project_last_modified != ctx.project
            && !candidates.bypass_ownership.contains(&record.id)
        {
            let current = self
                .project(&ctx.project)
                .map(|p| p.name)
                .unwrap_or_else(|_| ctx.project.to_string());
            let reason = VellumError::NotOwned {
                path: record.path.to_string(),
                project: current,
            };
            return Some((PublishOutcome::SkippedNotOwned, Some(reason.to_string())));
        }

        if let Some(lock) = self.inner.locks.blocking(&record.id, &ctx.actor) {
            return Some((
                PublishOutcome::SkippedLocked,
                Some(format!("locked by {}", lock.holder)),
            ));
        }

        if record.state == ResourceState::New {
            let parent = record.path.parent().unwrap_or_else(ResourcePath::root);
            let parent_online =
                unpoisoned(&self.inner.directory).folder_exists(View::Online, &parent);
            if !parent_online {
                return Some((
                    PublishOutcome::SkippedParentUnpublished,
                    Some(format!("parent folder {} is not published", parent)),
                ));
            }
        }
        None
    }

    /// Commit one candidate; the caller holds its commit guard
    async fn commit_publish(
        &self,
        ctx: &Context,
        record: &Resource,
        tag: u64,
    ) -> Result<PublishOutcome> {
        match record.state.apply(Transition::Publish)? {
            NextState::Keep(state) => {
                if let Some(content) = &record.content {
                    self.inner.content.verify(content).await?;
                }

                let previous = self.record_by_id(View::Online, &record.id);
                if let Some(previous) = &previous {
                    let payload = self.snapshot_payload(previous).await;
                    self.inner
                        .history
                        .record(previous, payload, tag, &ctx.actor)
                        .await?;
                }

                let mut online = record.clone();
                online.state = state;
                let mut orphaned = self.commit_record(View::Online, online).await?;

                let mut offline = record.clone();
                offline.state = state;
                orphaned.extend(self.commit_record(View::Offline, offline).await?);
                self.reclaim(orphaned).await;
                Ok(PublishOutcome::Published)
            }
            NextState::Removed => {
                if record.is_folder() {
                    let remaining = {
                        let directory = unpoisoned(&self.inner.directory);
                        directory.children(View::Offline, &record.path).len()
                            + directory.children(View::Online, &record.path).len()
                    };
                    if remaining > 0 {
                        return Err(VellumError::InvalidOperation(format!(
                            "folder {} still has {} children",
                            record.path, remaining
                        )));
                    }
                }

                let mut orphaned = Vec::new();
                if let Some(previous) = self.record_by_id(View::Online, &record.id) {
                    let payload = self.snapshot_payload(&previous).await;
                    self.inner
                        .history
                        .record(&previous, payload, tag, &ctx.actor)
                        .await?;
                    orphaned.extend(self.remove_record(View::Online, &record.id).await?);
                }
                orphaned.extend(self.remove_record(View::Offline, &record.id).await?);
                self.inner.guards.forget(&record.id);
                self.reclaim(orphaned).await;
                Ok(PublishOutcome::Deleted)
            }
        }
    }

    /// Payload of an online record for its history snapshot. An
    /// unreadable payload yields a record-only snapshot.
    async fn snapshot_payload(&self, previous: &Resource) -> Option<Vec<u8>> {
        let content = previous.content.as_ref()?;
        match self.inner.content.read(content).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(path = %previous.path, error = %e, "Snapshot taken without payload");
                None
            }
        }
    }
}

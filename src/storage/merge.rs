//! Folding one task store into a session writer.

use crate::core::containers::{
    AnalysisReport, EventData, EventSource, EventTag, ExtractionWarning,
};
use crate::core::error::StorageResult;
use crate::core::identifiers::Identifier;
use crate::storage::facade::StorageWriter;
use crate::storage::interface::AttributeContainerStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub event_data: u64,
    pub events: u64,
    pub event_tags: u64,
    pub event_sources: u64,
    pub warnings: u64,
    pub analysis_reports: u64,
    /// References to event data or events the task store did not contain.
    pub unresolved_references: u64,
    /// The writer already held this task; nothing was copied.
    pub already_merged: bool,
}

impl MergeSummary {
    pub fn total(&self) -> u64 {
        self.event_data
            + self.events
            + self.event_tags
            + self.event_sources
            + self.warnings
            + self.analysis_reports
    }

    pub fn add(&mut self, other: &MergeSummary) {
        self.event_data += other.event_data;
        self.events += other.events;
        self.event_tags += other.event_tags;
        self.event_sources += other.event_sources;
        self.warnings += other.warnings;
        self.analysis_reports += other.analysis_reports;
        self.unresolved_references += other.unresolved_references;
    }
}

fn remap(
    mapping: &HashMap<Identifier, Identifier>,
    reference: &mut Option<Identifier>,
    unresolved: &mut u64,
) {
    let Some(original) = reference.take() else {
        return;
    };
    match mapping.get(&original) {
        Some(merged) => *reference = Some(merged.clone()),
        None => {
            warn!(identifier = %original, "dropping reference to container missing from task store");
            *unresolved += 1;
        }
    }
}

/// Copies every mergeable container of `source` into `writer` as one unit.
///
/// A failure leaves the writer as it was before the call, and a task the
/// writer already took in is skipped, so a retried merge never duplicates.
pub fn merge_store_into<S, W>(
    task_identifier: &str,
    source: &S,
    writer: &mut W,
) -> StorageResult<MergeSummary>
where
    S: AttributeContainerStore,
    W: StorageWriter,
{
    if !writer.begin_task_merge(task_identifier)? {
        info!(task = %task_identifier, "task already merged, skipping copy");
        return Ok(MergeSummary {
            already_merged: true,
            ..Default::default()
        });
    }
    let copied = copy_containers(source, writer)
        .and_then(|summary| writer.commit_task_merge(task_identifier).map(|()| summary));
    match copied {
        Ok(summary) => Ok(summary),
        Err(e) => {
            if let Err(abort) = writer.abort_task_merge() {
                warn!(task = %task_identifier, error = %abort, "rolling back task merge failed");
            }
            Err(e)
        }
    }
}

// Event data goes first so events can point at their merged identifiers;
// events go in chronological order, then tags pointing at merged events.
fn copy_containers<S, W>(source: &S, writer: &mut W) -> StorageResult<MergeSummary>
where
    S: AttributeContainerStore,
    W: StorageWriter,
{
    let mut summary = MergeSummary::default();

    let mut event_data_identifiers = HashMap::new();
    for event_data in source.get_containers::<EventData>()? {
        let mut event_data = event_data?;
        let original = event_data.identifier.take();
        let merged = writer.add_event_data(&mut event_data)?;
        if let Some(original) = original {
            event_data_identifiers.insert(original, merged);
        }
        summary.event_data += 1;
    }

    let mut event_identifiers = HashMap::new();
    for event in source.get_sorted_events(None)? {
        let mut event = event?;
        let original = event.identifier.take();
        remap(
            &event_data_identifiers,
            &mut event.event_data_identifier,
            &mut summary.unresolved_references,
        );
        let merged = writer.add_event(&mut event)?;
        if let Some(original) = original {
            event_identifiers.insert(original, merged);
        }
        summary.events += 1;
    }

    for event_tag in source.get_containers::<EventTag>()? {
        let mut event_tag = event_tag?;
        event_tag.identifier = None;
        remap(
            &event_identifiers,
            &mut event_tag.event_identifier,
            &mut summary.unresolved_references,
        );
        writer.add_event_tag(&mut event_tag)?;
        summary.event_tags += 1;
    }

    for event_source in source.get_containers::<EventSource>()? {
        let mut event_source = event_source?;
        writer.add_event_source(&mut event_source)?;
        summary.event_sources += 1;
    }

    for warning in source.get_containers::<ExtractionWarning>()? {
        let mut warning = warning?;
        writer.add_warning(&mut warning)?;
        summary.warnings += 1;
    }

    for report in source.get_containers::<AnalysisReport>()? {
        let mut report = report?;
        writer.add_analysis_report(&mut report)?;
        summary.analysis_reports += 1;
    }

    Ok(summary)
}

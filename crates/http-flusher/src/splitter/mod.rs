//! Decides how many requests one input batch becomes and what goes in each.
//!
//! Legacy groups split per log only when a placeholder must be resolved
//! against log-level tags; otherwise a group is one body joined by the
//! protocol's line terminator. Generic groups always resolve against group
//! metadata, and split per event unless a separator joins them.

use bytes::{Bytes, BytesMut};

use crate::convert::{ConvertError, Converter};
use crate::models::{LogGroup, PipelineGroupEvents};
use crate::request::RequestDraft;
use crate::template::{GroupMetadata, GroupTags, QueryPlan, RecordTags};

/// A record left out of every draft because it could not be encoded.
#[derive(Debug)]
pub struct SkippedRecord {
    pub group: usize,
    pub record: usize,
    pub error: ConvertError,
}

#[derive(Debug, Default)]
pub struct SplitOutcome {
    pub drafts: Vec<RequestDraft>,
    pub skipped: Vec<SkippedRecord>,
}

pub fn split_log_groups(
    groups: &[LogGroup],
    converter: &Converter,
    plan: &QueryPlan,
) -> SplitOutcome {
    let per_record = converter.scope().is_record_level() && plan.has_variables();
    let mut outcome = SplitOutcome::default();

    for (group_idx, group) in groups.iter().enumerate() {
        if per_record {
            for (record, log) in group.logs.iter().enumerate() {
                match converter.encode_log(log, group) {
                    Ok(body) => outcome.drafts.push(RequestDraft {
                        query: plan.resolve(&RecordTags { log, group }),
                        body: Bytes::from(body),
                    }),
                    Err(error) => outcome.skipped.push(SkippedRecord {
                        group: group_idx,
                        record,
                        error,
                    }),
                }
            }
            continue;
        }

        let mut body = BytesMut::new();
        let mut encoded = 0usize;
        for (record, log) in group.logs.iter().enumerate() {
            match converter.encode_log(log, group) {
                Ok(line) => {
                    body.extend_from_slice(&line);
                    body.extend_from_slice(converter.line_terminator());
                    encoded += 1;
                }
                Err(error) => outcome.skipped.push(SkippedRecord {
                    group: group_idx,
                    record,
                    error,
                }),
            }
        }
        if encoded > 0 {
            outcome.drafts.push(RequestDraft {
                query: plan.resolve(&GroupTags(group)),
                body: body.freeze(),
            });
        }
    }
    outcome
}

pub fn split_group_events(
    groups: &[PipelineGroupEvents],
    converter: &Converter,
    plan: &QueryPlan,
) -> SplitOutcome {
    let mut outcome = SplitOutcome::default();

    for (group_idx, group_events) in groups.iter().enumerate() {
        let query = plan.resolve(&GroupMetadata(&group_events.group));

        let mut payloads = Vec::with_capacity(group_events.events.len());
        for (record, event) in group_events.events.iter().enumerate() {
            match converter.encode_event(event) {
                Ok(payload) => payloads.push(payload),
                Err(error) => outcome.skipped.push(SkippedRecord {
                    group: group_idx,
                    record,
                    error,
                }),
            }
        }
        if payloads.is_empty() {
            continue;
        }

        match converter.separator() {
            Some(separator) => outcome.drafts.push(RequestDraft {
                query,
                body: join(&payloads, separator.as_bytes()),
            }),
            None => outcome
                .drafts
                .extend(payloads.into_iter().map(|body| RequestDraft {
                    query: query.clone(),
                    body,
                })),
        }
    }
    outcome
}

fn join(payloads: &[Bytes], separator: &[u8]) -> Bytes {
    let len = payloads.iter().map(Bytes::len).sum::<usize>()
        + separator.len() * payloads.len().saturating_sub(1);
    let mut body = BytesMut::with_capacity(len);
    for (i, payload) in payloads.iter().enumerate() {
        if i > 0 {
            body.extend_from_slice(separator);
        }
        body.extend_from_slice(payload);
    }
    body.freeze()
}

#[cfg(test)]
mod tests;

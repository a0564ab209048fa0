//! Deterministic plan identity.
//!
//! The identity is a SHA-256 over a length-prefixed encoding of the graph's
//! structure and the runtime config entries. The encoding is part of the
//! contract: changing field order or tags changes every id, so bump
//! `IDENTITY_VERSION` when doing so.

use flowplan_common::{keys, PlanId, RuntimeConfig};
use sha2::{Digest, Sha256};

use crate::logical_graph::{CompareOp, LogicalGraph, StageKind};

const IDENTITY_VERSION: &[u8] = b"flowplan-plan-id/v1";

/// Derive the identity of `(graph, config)`.
///
/// Pure and total. The `flowplan.plan.id` entry itself is ignored so a
/// config that already carries an identity derives the same id again.
pub fn derive_plan_id(graph: &LogicalGraph, config: &RuntimeConfig) -> PlanId {
    let mut h = Sha256::new();
    h.update(IDENTITY_VERSION);

    put_len(&mut h, graph.len());
    for stage in graph.stages() {
        put_u32(&mut h, stage.id.0);
        put_str(&mut h, &stage.name);
        put_kind(&mut h, &stage.kind);
        put_len(&mut h, stage.inputs.len());
        for input in &stage.inputs {
            put_u32(&mut h, input.0);
        }
        put_len(&mut h, stage.descriptions.len());
        for d in &stage.descriptions {
            put_str(&mut h, d);
        }
    }

    let entries = config
        .iter()
        .filter(|(k, _)| *k != keys::PLAN_ID)
        .collect::<Vec<_>>();
    put_len(&mut h, entries.len());
    for (k, v) in entries {
        put_str(&mut h, k);
        put_str(&mut h, v);
    }

    PlanId(hex::encode(h.finalize()))
}

/// Derive the identity and return the config copy that carries it.
///
/// The input config is left untouched.
pub fn assign_plan_id(graph: &LogicalGraph, config: &RuntimeConfig) -> (PlanId, RuntimeConfig) {
    let id = derive_plan_id(graph, config);
    let derived = config.with(keys::PLAN_ID, id.as_str());
    (id, derived)
}

fn put_kind(h: &mut Sha256, kind: &StageKind) {
    match kind {
        StageKind::Source { column, rows } => {
            h.update([1u8]);
            put_str(h, column);
            put_len(h, rows.len());
            for r in rows {
                put_str(h, r);
            }
        }
        StageKind::Map { operator, options } => {
            h.update([2u8]);
            put_str(h, operator);
            put_len(h, options.len());
            for (k, v) in options {
                put_str(h, k);
                put_str(h, v);
            }
        }
        StageKind::Filter { op, value } => {
            h.update([3u8]);
            h.update([match op {
                CompareOp::Eq => 0u8,
                CompareOp::NotEq => 1,
                CompareOp::StartsWith => 2,
                CompareOp::Contains => 3,
            }]);
            put_str(h, value);
        }
        StageKind::Distinct => h.update([4u8]),
        StageKind::Merge => h.update([5u8]),
        StageKind::Sink { table } => {
            h.update([6u8]);
            put_str(h, table);
        }
    }
}

fn put_len(h: &mut Sha256, n: usize) {
    h.update((n as u64).to_le_bytes());
}

fn put_u32(h: &mut Sha256, v: u32) {
    h.update(v.to_le_bytes());
}

fn put_str(h: &mut Sha256, s: &str) {
    put_len(h, s.len());
    h.update(s.as_bytes());
}

//! Conflict and default-target normalization for control calls.
//!
//! Policy, in order: duplicate correlation ids are dropped; an implicit
//! multi-target call collapses to one preferred target (group-likeness
//! first, then shortest identifier); calls landing on the same resolved
//! target obey last-writer-wins, because sequential instructions in one
//! model turn supersede earlier ones. All three are tunable product
//! defaults, not invariants.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::directive::ToolKind;
use crate::application::tooling::EntityLookup;
use crate::domain::types::ToolCall;

/// Entity targets listed by a control call (`targets` array, or the
/// single-target `target` form).
pub fn control_targets(arguments: &Map<String, Value>) -> Vec<String> {
    if let Some(array) = arguments.get("targets").and_then(Value::as_array) {
        return array
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    arguments
        .get("target")
        .and_then(Value::as_str)
        .map(|single| vec![single.to_string()])
        .unwrap_or_default()
}

/// Whether the call explicitly asked for batch execution across targets.
pub fn is_batch(arguments: &Map<String, Value>) -> bool {
    arguments
        .get("batch")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Domain prefix of an entity id (`lock.front_door` → `lock`).
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}

/// Applies the full normalization pipeline to one batch of calls.
pub async fn normalize_control_calls(
    calls: Vec<ToolCall>,
    lookup: &dyn EntityLookup,
) -> Vec<ToolCall> {
    let calls = dedupe_by_id(calls);

    let mut collapsed = Vec::with_capacity(calls.len());
    for mut call in calls {
        if ToolKind::classify(&call.name) == ToolKind::Control {
            collapse_targets(&mut call, lookup).await;
        }
        collapsed.push(call);
    }

    last_writer_wins(collapsed)
}

fn dedupe_by_id(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(calls.len());
    for call in calls {
        let duplicate =
            ToolKind::classify(&call.name) == ToolKind::Control && !seen.insert(call.id.clone());
        if duplicate {
            warn!(id = %call.id, tool = %call.name, "Dropping duplicate control call id");
        } else {
            kept.push(call);
        }
    }
    kept
}

/// Collapses an implicit multi-target control call to its preferred target.
///
/// Models default to naming every member of an implicit group; absent an
/// explicit batch flag the user almost always meant the group itself.
async fn collapse_targets(call: &mut ToolCall, lookup: &dyn EntityLookup) {
    let targets = control_targets(&call.arguments);
    if targets.len() < 2 || is_batch(&call.arguments) {
        return;
    }

    let mut ranked = Vec::with_capacity(targets.len());
    for target in targets {
        let group = lookup.is_group(&target).await;
        ranked.push((group, target));
    }

    // Group targets sort first, then shortest identifier; lexicographic
    // last so the choice is deterministic.
    let preferred = ranked
        .iter()
        .min_by_key(|(group, target)| (!group, target.len(), target.clone()))
        .map(|(_, target)| target.clone());

    if let Some(preferred) = preferred {
        debug!(
            tool = %call.name,
            preferred = %preferred,
            dropped = ranked.len() - 1,
            "Collapsing implicit multi-target control call"
        );
        call.arguments.remove("target");
        call.arguments.insert("targets".into(), json!([preferred]));
    }
}

/// Resolution key for conflict detection: the sorted target set.
fn resolved_key(call: &ToolCall) -> Option<String> {
    if ToolKind::classify(&call.name) != ToolKind::Control {
        return None;
    }
    let mut targets = control_targets(&call.arguments);
    if targets.is_empty() {
        return None;
    }
    targets.sort();
    Some(targets.join("+"))
}

fn last_writer_wins(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut last_index: HashMap<String, usize> = HashMap::new();
    for (index, call) in calls.iter().enumerate() {
        if let Some(key) = resolved_key(call) {
            last_index.insert(key, index);
        }
    }

    calls
        .into_iter()
        .enumerate()
        .filter(|(index, call)| match resolved_key(call) {
            Some(key) => {
                let keep = last_index.get(&key) == Some(index);
                if !keep {
                    warn!(
                        tool = %call.name,
                        target = %key,
                        "Dropping control call superseded by a later one on the same target"
                    );
                }
                keep
            }
            None => true,
        })
        .map(|(_, call)| call)
        .collect()
}

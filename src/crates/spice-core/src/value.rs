//! Closed-set typed value used by `data`, `context`, and checkpoint payloads
//!
//! The original system carried reflection-based metadata (arbitrary `Any`
//! values). Spec §9 calls for replacing that with a closed-set variant safe
//! to serialize — this is the only representation `Message::data`,
//! `Message::context`, and the checkpoint/DLQ stores use. It is a thin,
//! serde-friendly wrapper over [`serde_json::Value`] rather than a bespoke
//! enum, since JSON is the assumed (not mandated) wire format (spec §1) and
//! `serde_json::Value` already closes the set to
//! string/number/bool/array/object/null.

use serde_json::Value as Json;
use std::collections::HashMap;

/// A typed, JSON-serializable value. Alias kept distinct from
/// `serde_json::Value` so call sites read as domain vocabulary
/// (`SpiceValue`) rather than a transport detail.
pub type SpiceValue = Json;

/// A string-keyed map of [`SpiceValue`]s — the shape used throughout for
/// `Message::data` and `Message::context`.
pub type ValueMap = HashMap<String, SpiceValue>;

/// Merge `incoming` into `base`, with `incoming` winning on key collisions.
///
/// This is the merge semantics spec §3 invariant (d) requires for
/// `Message::context`: keys set by a prior node persist unless explicitly
/// overwritten, and resume's `HumanResponse.metadata` merge (spec §4.10
/// step 3) uses the same rule.
pub fn merge_value_maps(base: &ValueMap, incoming: &ValueMap) -> ValueMap {
    let mut merged = base.clone();
    for (k, v) in incoming {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

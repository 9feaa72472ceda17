//! In-memory parameter snapshots.
//!
//! Keys are dotted paths (`b1.b.conv1.weight`) matching the layer nesting,
//! which keeps weights exported from other frameworks loadable by name.

use crate::nn::Module;
use crate::tensor::Tensor;
use std::collections::BTreeMap;

pub type StateDict = BTreeMap<String, TensorData>;

/// Detached copy of one parameter
#[derive(Clone, Debug, PartialEq)]
pub struct TensorData {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl TensorData {
    pub fn from_tensor(t: &Tensor) -> Self {
        let borrowed = t.borrow();
        TensorData {
            data: borrowed.data.clone(),
            shape: borrowed.shape.clone(),
        }
    }
}

/// Summary of differences between two state dicts.
///
/// `expected` is usually `model.state_dict()`, `loaded` whatever is about to
/// be applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateDictDiff {
    pub missing_keys: Vec<String>,
    pub unexpected_keys: Vec<String>,
    /// `(key, expected_shape, loaded_shape)`
    pub shape_mismatches: Vec<(String, Vec<usize>, Vec<usize>)>,
}

impl StateDictDiff {
    pub fn is_empty(&self) -> bool {
        self.missing_keys.is_empty()
            && self.unexpected_keys.is_empty()
            && self.shape_mismatches.is_empty()
    }
}

pub fn diff_state_dict(expected: &StateDict, loaded: &StateDict) -> StateDictDiff {
    let mut diff = StateDictDiff::default();

    for (key, expected_td) in expected {
        match loaded.get(key) {
            None => diff.missing_keys.push(key.clone()),
            Some(actual_td) if actual_td.shape != expected_td.shape => {
                diff.shape_mismatches.push((
                    key.clone(),
                    expected_td.shape.clone(),
                    actual_td.shape.clone(),
                ));
            }
            Some(_) => {}
        }
    }

    diff.unexpected_keys = loaded
        .keys()
        .filter(|key| !expected.contains_key(*key))
        .cloned()
        .collect();

    diff
}

/// Load a state dict and report what did not line up.
pub fn load_state_dict_checked<M: Module + ?Sized>(
    module: &mut M,
    state: &StateDict,
) -> StateDictDiff {
    let expected = module.state_dict();
    let diff = diff_state_dict(&expected, state);
    module.load_state_dict(state);
    diff
}

/// Nest `sub` under `prefix.` inside `state`.
pub fn insert_prefixed(state: &mut StateDict, prefix: &str, sub: StateDict) {
    for (key, value) in sub {
        state.insert(format!("{prefix}.{key}"), value);
    }
}

/// Entries of `state` under `prefix.`, with the prefix stripped.
pub fn sub_state(state: &StateDict, prefix: &str) -> StateDict {
    let prefix = format!("{prefix}.");
    state
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.to_string(), value.clone()))
        })
        .collect()
}

/// Copy `state[key]` into `param` when present and shape-compatible.
///
/// Mismatched shapes are skipped with a warning; the parameter keeps its
/// current values.
pub fn load_parameter(param: &Tensor, state: &StateDict, key: &str) {
    let Some(td) = state.get(key) else { return };
    let mut p = param.borrow_mut();
    if p.shape != td.shape || td.data.len() != p.data.len() {
        log::warn!(
            "skipping '{key}': expected shape {:?}, got {:?}",
            p.shape,
            td.shape
        );
        return;
    }
    p.data.copy_from_slice(&td.data);
}

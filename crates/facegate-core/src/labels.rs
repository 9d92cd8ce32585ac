use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Dense integer label ↔ identity name mapping.
///
/// Labels are positions in the sorted identity list, starting at 0 with no
/// gaps. The same dataset always yields the same map, and a map is only
/// meaningful next to the model generation that was trained with it.
/// Serializes as a JSON object keyed by the label as a string (`{"0": "alice"}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(BTreeMap<u32, String>);

impl LabelMap {
    /// Enumerate `names` after sorting them, assigning 0, 1, 2, ...
    pub fn from_identities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self(
            names
                .into_iter()
                .enumerate()
                .map(|(label, name)| (label as u32, name))
                .collect(),
        )
    }

    pub fn name(&self, label: u32) -> Option<&str> {
        self.0.get(&label).map(String::as_str)
    }

    pub fn label(&self, name: &str) -> Option<u32> {
        self.0
            .iter()
            .find_map(|(label, n)| (n == name).then_some(*label))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.0.iter().map(|(label, name)| (*label, name.as_str()))
    }
}

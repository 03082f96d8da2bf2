use std::collections::{HashMap, HashSet};

use super::client::DomainPreset;

pub const DEFAULT_COMBO: &str = "default";

/// Sorted, pipe-joined combo key from a classifier's labels, per
/// spec.md §9's glossary entry.
pub fn combo_key(labels: &[String]) -> String {
    if labels.is_empty() {
        return DEFAULT_COMBO.to_string();
    }
    let mut sorted = labels.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted.join("|")
}

/// Split a combo key back into its constituent domain labels.
pub fn split_combo(combo: &str) -> Vec<&str> {
    if combo == DEFAULT_COMBO {
        return vec![DEFAULT_COMBO];
    }
    combo.split('|').collect()
}

/// Merge the entity/relation type sets of every enabled domain in a combo.
/// Returns `None` if every domain in the combo is disabled (step 6 of
/// spec.md §4.8: such nodes should be marked processed without calling
/// the extraction service).
pub fn merged_types_for_combo(
    combo: &str,
    presets: &HashMap<String, DomainPreset>,
) -> Option<(Vec<String>, Vec<String>)> {
    let domains = split_combo(combo);
    let mut entity_types: HashSet<String> = HashSet::new();
    let mut relation_types: HashSet<String> = HashSet::new();
    let mut any_enabled = false;

    for domain in domains {
        let Some(preset) = presets.get(domain) else {
            continue;
        };
        if !preset.enabled {
            continue;
        }
        any_enabled = true;
        entity_types.extend(preset.entity_types.iter().cloned());
        relation_types.extend(preset.relation_types.iter().cloned());
    }

    if !any_enabled {
        return None;
    }

    let mut entity_types: Vec<String> = entity_types.into_iter().collect();
    let mut relation_types: Vec<String> = relation_types.into_iter().collect();
    entity_types.sort();
    relation_types.sort();
    Some((entity_types, relation_types))
}

//! Label and annotation merging.
//!
//! Precedence, low to high: global config, the config resource's common labels,
//! its controller labels, then the operator's identity labels. Keys under reserved
//! domains are dropped from user input before the merge.

use crate::constants::{
    LABEL_APP, LABEL_APP_VALUE, LABEL_MANAGED_BY, LABEL_PART_OF, OPERATOR_NAME,
    RESERVED_LABEL_DOMAINS,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Whether `key` has a prefix under one of the reserved domains
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    let Some((prefix, _)) = key.split_once('/') else {
        return false;
    };
    RESERVED_LABEL_DOMAINS.iter().any(|domain| {
        prefix == *domain
            || prefix
                .strip_suffix(domain)
                .is_some_and(|rest| rest.ends_with('.'))
    })
}

/// Copy of `input` without reserved keys
#[must_use]
pub fn filter_reserved(input: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    input
        .iter()
        .filter(|(key, _)| {
            let reserved = is_reserved(key);
            if reserved {
                debug!(key = %key, "Dropping user-supplied key under a reserved domain");
            }
            !reserved
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Labels every managed object carries, never overridden
#[must_use]
pub fn identity_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), LABEL_APP_VALUE.to_string()),
        (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (LABEL_PART_OF.to_string(), OPERATOR_NAME.to_string()),
    ])
}

/// Merge user label layers (lowest first) on top of which the identity labels are set
#[must_use]
pub fn merge_labels(layers: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let mut merged = merge_user(layers);
    merged.extend(identity_labels());
    merged
}

/// Merge user annotation layers (lowest first)
#[must_use]
pub fn merge_annotations(layers: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    merge_user(layers)
}

fn merge_user(layers: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        merged.extend(filter_reserved(layer));
    }
    merged
}

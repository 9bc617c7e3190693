//! Unused-key guard.
//!
//! "Consumed pointers" are JSON Pointer prefixes read by the service. Any leaf
//! of the merged config not under one of them is reported as unused; callers
//! decide whether that is a warning or an error.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Sections decoded into [`crate::AppConfig`].
pub const CONSUMED_SECTIONS: &[&str] = &["/server", "/database", "/logging", "/engine", "/cors"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Consumed JSON-pointer prefixes used for this analysis (sorted, unique)
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Produce an unused-key report for the merged config.
/// With `UnusedKeyPolicy::Fail` an unclean report is an error.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = CONSUMED_SECTIONS
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        // An empty root object reports as "/" and means "nothing configured".
        .filter(|lp| lp != "/" || !config_json.as_object().map_or(false, |m| m.is_empty()))
        .filter(|lp| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, lp)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s) detected. First few: {:?}",
            report.unused_leaf_pointers.len(),
            report.unused_leaf_pointers.iter().take(12).collect::<Vec<_>>()
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// "/a/b" consumes "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

pub(crate) fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_sections_are_clean() {
        let cfg = json!({
            "server": {"addr": "127.0.0.1:3000"},
            "engine": {"waiting_list_nulls": "first"},
            "cors": {"allowed_origins": ["http://localhost"]}
        });
        let report = report_unused_keys(&cfg, UnusedKeyPolicy::Fail).unwrap();
        assert!(report.is_clean(), "{:?}", report.unused_leaf_pointers);
    }

    #[test]
    fn empty_config_is_clean() {
        let report = report_unused_keys(&json!({}), UnusedKeyPolicy::Fail).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn stray_keys_warn_or_fail() {
        let cfg = json!({
            "server": {"addr": "127.0.0.1:3000"},
            "serverx": {"port": 1},
            "swagger": {"enabled": true}
        });

        let report = report_unused_keys(&cfg, UnusedKeyPolicy::Warn).unwrap();
        assert_eq!(
            report.unused_leaf_pointers,
            vec!["/serverx/port".to_string(), "/swagger/enabled".to_string()]
        );

        let err = report_unused_keys(&cfg, UnusedKeyPolicy::Fail).unwrap_err();
        assert!(err.to_string().contains("CONFIG_UNUSED_KEYS"));
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        assert!(is_prefix_pointer("/engine", "/engine/call_identity"));
        assert!(!is_prefix_pointer("/engine", "/engines/x"));
        assert_eq!(normalize_pointer("engine/"), "/engine");
    }
}

use serde::{Deserialize, Serialize};

/// Declarative resource filtering applied uniformly to every page drawn
/// from the shared session.
///
/// Configuration, not per-job logic: the backend enforces it when the
/// session is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPolicy {
    /// Secondary resource categories to block (e.g. "image", "font").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_resource_types: Vec<String>,
    /// Third-party hosts to block outright.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_hosts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_serializes_to_empty_object() {
        let json = serde_json::to_string(&FilterPolicy::default()).unwrap();
        assert_eq!(json, "{}");
    }
}

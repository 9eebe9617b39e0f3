// Path: crates/types/src/capability.rs
//! Capability profile of a worker and the static tool → credential map.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What this worker can do: providers granted by the credential bridge plus
/// locally validated operator capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityProfile {
    pub credential_providers: BTreeSet<String>,
    pub operator_capabilities: BTreeSet<String>,
}

impl CapabilityProfile {
    /// A request is eligible iff every required credential provider is
    /// granted AND every required operator capability is locally present.
    pub fn satisfies(&self, tools: &[String]) -> bool {
        required_credentials(tools)
            .iter()
            .all(|p| self.credential_providers.contains(p))
            && required_operator_capabilities(tools)
                .iter()
                .all(|c| self.operator_capabilities.contains(c))
    }

    /// True when at least one of the request's tools needs a credential the
    /// worker actually holds. Used for trusted-operator claim priority.
    pub fn holds_credential_for(&self, tools: &[String]) -> bool {
        required_credentials(tools)
            .iter()
            .any(|p| self.credential_providers.contains(p))
    }
}

/// Static projection bundled with the worker: which credential providers a
/// tool needs. Tools absent from the table need no credentials.
static TOOL_CREDENTIALS: Lazy<BTreeMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| {
        BTreeMap::from([
            ("embed_text", &["openai"][..]),
            ("generate_text", &["openai"][..]),
            ("open_pull_request", &["github"][..]),
            ("read_repository", &["github"][..]),
            ("post_update", &["telegram"][..]),
        ])
    });

/// Operator-local capabilities a tool needs on top of bridge credentials
/// (e.g. a working local GitHub token for PR plumbing).
static TOOL_OPERATOR_CAPABILITIES: Lazy<BTreeMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| BTreeMap::from([("open_pull_request", &["github"][..])]));

/// Union of credential providers required by a request's tool list.
pub fn required_credentials(tools: &[String]) -> BTreeSet<String> {
    tools
        .iter()
        .filter_map(|t| TOOL_CREDENTIALS.get(t.as_str()))
        .flat_map(|providers| providers.iter().map(|p| p.to_string()))
        .collect()
}

/// Union of operator capabilities required by a request's tool list.
pub fn required_operator_capabilities(tools: &[String]) -> BTreeSet<String> {
    tools
        .iter()
        .filter_map(|t| TOOL_OPERATOR_CAPABILITIES.get(t.as_str()))
        .flat_map(|caps| caps.iter().map(|c| c.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn profile(providers: &[&str], caps: &[&str]) -> CapabilityProfile {
        CapabilityProfile {
            credential_providers: providers.iter().map(|s| s.to_string()).collect(),
            operator_capabilities: caps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn unknown_tools_need_nothing() {
        assert!(required_credentials(&tools(&["create_artifact"])).is_empty());
        assert!(profile(&[], &[]).satisfies(&tools(&["create_artifact"])));
    }

    #[test]
    fn embed_text_needs_openai_grant() {
        let t = tools(&["embed_text"]);
        assert!(profile(&["openai"], &[]).satisfies(&t));
        assert!(!profile(&["github"], &[]).satisfies(&t));
    }

    #[test]
    fn pull_request_needs_bridge_and_operator_side() {
        let t = tools(&["open_pull_request"]);
        assert!(!profile(&["github"], &[]).satisfies(&t));
        assert!(!profile(&[], &["github"]).satisfies(&t));
        assert!(profile(&["github"], &["github"]).satisfies(&t));
    }

    #[test]
    fn satisfies_implies_provider_superset() {
        // Eligibility implies every mapped provider is granted.
        let t = tools(&["embed_text", "post_update"]);
        let p = profile(&["openai", "telegram"], &[]);
        assert!(p.satisfies(&t));
        for provider in required_credentials(&t) {
            assert!(p.credential_providers.contains(&provider));
        }
    }

    #[test]
    fn trusted_operator_detection() {
        let p = profile(&["github"], &[]);
        assert!(p.holds_credential_for(&tools(&["read_repository", "embed_text"])));
        assert!(!p.holds_credential_for(&tools(&["embed_text"])));
    }
}

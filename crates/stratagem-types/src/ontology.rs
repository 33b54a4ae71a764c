//! Assembled ontology context.
//!
//! The ontology context is the structured briefing handed to the agent
//! orchestrator with every turn: what the scope is, which entities sit
//! inside it, and a prose summary the agent can quote from. It is
//! assembled by `stratagem-infra`'s context loader and cached inside
//! the session metadata blob.

use serde::{Deserialize, Serialize};

use crate::context::OntologyEntityKind;

/// Compact description of one entity inside the scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBrief {
    pub kind: OntologyEntityKind,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Compact description of the project a scope belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBrief {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Everything the orchestrator gets to know about the session scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OntologyContext {
    /// Prose briefing assembled from the rows below.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectBrief>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityBrief>,
    /// Rough `len / 4` estimate of the summary's token cost.
    #[serde(default)]
    pub token_estimate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_roundtrip() {
        let ctx = OntologyContext {
            summary: "Project Apollo has 3 open tasks.".to_string(),
            project: Some(ProjectBrief {
                id: "P1".to_string(),
                name: "Apollo".to_string(),
                status: Some("active".to_string()),
            }),
            entities: vec![EntityBrief {
                kind: OntologyEntityKind::Task,
                id: "T1".to_string(),
                name: "Ship it".to_string(),
                status: None,
            }],
            token_estimate: 8,
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: OntologyContext = serde_json::from_str(&json).unwrap();
        assert_eq!(ctx, parsed);
    }

    #[test]
    fn test_empty_context_omits_collections() {
        let json = serde_json::to_value(OntologyContext::default()).unwrap();
        assert!(json.get("project").is_none());
        assert!(json.get("entities").is_none());
    }
}

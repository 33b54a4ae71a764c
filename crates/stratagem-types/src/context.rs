//! Conversation context and focus types for Stratagem.
//!
//! A session is scoped by a [`ContextType`] (what the conversation is
//! broadly about) and optionally pointed at a specific sub-entity via a
//! [`ProjectFocus`]. Focus arrives from clients as a permissive
//! [`FocusPayload`] and is normalized by `stratagem-core::context` before
//! it is stored or compared.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Coarse scope of a conversation.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (context_type IN ('global', 'project', 'project_create',
/// 'project_audit', 'project_forecast', 'task', 'plan', 'goal', 'document'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    /// Workspace-wide conversation, no deterministic target.
    Global,
    /// Conversation about one project; `entity_id` is the project id.
    Project,
    /// Conversation that is creating a project; no target exists yet.
    ProjectCreate,
    /// Audit view of one project; `entity_id` is the project id.
    ProjectAudit,
    /// Forecast view of one project; `entity_id` is the project id.
    ProjectForecast,
    /// Conversation about one task; `entity_id` is the task id.
    Task,
    /// Conversation about one plan; `entity_id` is the plan id.
    Plan,
    /// Conversation about one goal; `entity_id` is the goal id.
    Goal,
    /// Conversation about one document; `entity_id` is the document id.
    Document,
}

impl ContextType {
    /// Context types whose `entity_id` is a project id.
    pub fn is_project_scoped(&self) -> bool {
        matches!(
            self,
            ContextType::Project | ContextType::ProjectAudit | ContextType::ProjectForecast
        )
    }

    /// The ontology entity kind behind an entity-scoped context type.
    pub fn entity_kind(&self) -> Option<OntologyEntityKind> {
        match self {
            ContextType::Task => Some(OntologyEntityKind::Task),
            ContextType::Plan => Some(OntologyEntityKind::Plan),
            ContextType::Goal => Some(OntologyEntityKind::Goal),
            ContextType::Document => Some(OntologyEntityKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextType::Global => write!(f, "global"),
            ContextType::Project => write!(f, "project"),
            ContextType::ProjectCreate => write!(f, "project_create"),
            ContextType::ProjectAudit => write!(f, "project_audit"),
            ContextType::ProjectForecast => write!(f, "project_forecast"),
            ContextType::Task => write!(f, "task"),
            ContextType::Plan => write!(f, "plan"),
            ContextType::Goal => write!(f, "goal"),
            ContextType::Document => write!(f, "document"),
        }
    }
}

impl FromStr for ContextType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(ContextType::Global),
            "project" => Ok(ContextType::Project),
            "project_create" => Ok(ContextType::ProjectCreate),
            "project_audit" => Ok(ContextType::ProjectAudit),
            "project_forecast" => Ok(ContextType::ProjectForecast),
            "task" => Ok(ContextType::Task),
            "plan" => Ok(ContextType::Plan),
            "goal" => Ok(ContextType::Goal),
            "document" => Ok(ContextType::Document),
            other => Err(format!("invalid context type: '{other}'")),
        }
    }
}

impl Default for ContextType {
    fn default() -> Self {
        ContextType::Global
    }
}

/// Kind of ontology entity a conversation or focus can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OntologyEntityKind {
    Task,
    Plan,
    Goal,
    Document,
}

impl fmt::Display for OntologyEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OntologyEntityKind::Task => write!(f, "task"),
            OntologyEntityKind::Plan => write!(f, "plan"),
            OntologyEntityKind::Goal => write!(f, "goal"),
            OntologyEntityKind::Document => write!(f, "document"),
        }
    }
}

impl FromStr for OntologyEntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(OntologyEntityKind::Task),
            "plan" => Ok(OntologyEntityKind::Plan),
            "goal" => Ok(OntologyEntityKind::Goal),
            "document" => Ok(OntologyEntityKind::Document),
            other => Err(format!("invalid ontology entity kind: '{other}'")),
        }
    }
}

/// What a focus points at within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusKind {
    /// The whole project, no specific sub-entity.
    ProjectWide,
    Task,
    Plan,
    Goal,
    Document,
}

impl FocusKind {
    /// The entity kind this focus targets, if it targets one at all.
    pub fn entity_kind(&self) -> Option<OntologyEntityKind> {
        match self {
            FocusKind::ProjectWide => None,
            FocusKind::Task => Some(OntologyEntityKind::Task),
            FocusKind::Plan => Some(OntologyEntityKind::Plan),
            FocusKind::Goal => Some(OntologyEntityKind::Goal),
            FocusKind::Document => Some(OntologyEntityKind::Document),
        }
    }
}

impl fmt::Display for FocusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FocusKind::ProjectWide => write!(f, "project_wide"),
            FocusKind::Task => write!(f, "task"),
            FocusKind::Plan => write!(f, "plan"),
            FocusKind::Goal => write!(f, "goal"),
            FocusKind::Document => write!(f, "document"),
        }
    }
}

impl Default for FocusKind {
    fn default() -> Self {
        FocusKind::ProjectWide
    }
}

/// Focus as it arrives on the wire: every field optional, strings
/// untrimmed and possibly empty. Normalization lives in
/// `stratagem-core::context::normalize_project_focus`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusPayload {
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub focus_type: Option<String>,
    pub focus_entity_id: Option<String>,
    pub focus_entity_name: Option<String>,
}

/// Normalized focus: the sub-entity the conversation currently concerns.
///
/// Only ever constructed through normalization, so `project_id` is
/// guaranteed non-empty and all strings are trimmed. Stored inside
/// `AgentSessionMetadata`, not as its own row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFocus {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default)]
    pub kind: FocusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
}

impl ProjectFocus {
    /// A project-wide focus with no sub-entity.
    pub fn project_wide(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            project_name: None,
            kind: FocusKind::ProjectWide,
            entity_id: None,
            entity_name: None,
        }
    }
}

/// The resolved scope of one turn: context type, target entity, and
/// focus, all post-normalization. Shared input of the access check and
/// the ontology loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextScope {
    pub context_type: ContextType,
    pub entity_id: Option<String>,
    pub focus: Option<ProjectFocus>,
}

impl ContextScope {
    /// Project id this scope resolves to, when one is derivable.
    ///
    /// A normalized focus wins; project-scoped context types fall back
    /// to their entity id. Global and entity-scoped contexts without a
    /// focus resolve to nothing.
    pub fn resolved_project_id(&self) -> Option<&str> {
        if let Some(focus) = &self.focus {
            return Some(&focus.project_id);
        }
        if self.context_type.is_project_scoped() {
            return self.entity_id.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_type_roundtrip() {
        for ct in [
            ContextType::Global,
            ContextType::Project,
            ContextType::ProjectCreate,
            ContextType::ProjectAudit,
            ContextType::ProjectForecast,
            ContextType::Task,
            ContextType::Plan,
            ContextType::Goal,
            ContextType::Document,
        ] {
            let s = ct.to_string();
            let parsed: ContextType = s.parse().unwrap();
            assert_eq!(ct, parsed);
        }
    }

    #[test]
    fn test_context_type_serde_matches_display() {
        let json = serde_json::to_string(&ContextType::ProjectAudit).unwrap();
        assert_eq!(json, "\"project_audit\"");
    }

    #[test]
    fn test_project_scoped_classification() {
        assert!(ContextType::Project.is_project_scoped());
        assert!(ContextType::ProjectAudit.is_project_scoped());
        assert!(ContextType::ProjectForecast.is_project_scoped());
        assert!(!ContextType::Global.is_project_scoped());
        assert!(!ContextType::Task.is_project_scoped());
    }

    #[test]
    fn test_entity_kind_for_entity_scoped_types() {
        assert_eq!(ContextType::Task.entity_kind(), Some(OntologyEntityKind::Task));
        assert_eq!(
            ContextType::Document.entity_kind(),
            Some(OntologyEntityKind::Document)
        );
        assert_eq!(ContextType::Project.entity_kind(), None);
        assert_eq!(ContextType::Global.entity_kind(), None);
    }

    #[test]
    fn test_focus_kind_entity_kind() {
        assert_eq!(FocusKind::ProjectWide.entity_kind(), None);
        assert_eq!(FocusKind::Task.entity_kind(), Some(OntologyEntityKind::Task));
    }

    #[test]
    fn test_focus_payload_accepts_partial_json() {
        let payload: FocusPayload =
            serde_json::from_str(r#"{"project_id": "P1"}"#).unwrap();
        assert_eq!(payload.project_id.as_deref(), Some("P1"));
        assert!(payload.focus_type.is_none());
        assert!(payload.focus_entity_id.is_none());
    }

    #[test]
    fn test_resolved_project_id_prefers_focus() {
        let scope = ContextScope {
            context_type: ContextType::Project,
            entity_id: Some("P1".to_string()),
            focus: Some(ProjectFocus::project_wide("P2")),
        };
        assert_eq!(scope.resolved_project_id(), Some("P2"));

        let scope = ContextScope {
            context_type: ContextType::ProjectAudit,
            entity_id: Some("P1".to_string()),
            focus: None,
        };
        assert_eq!(scope.resolved_project_id(), Some("P1"));

        let scope = ContextScope {
            context_type: ContextType::Global,
            entity_id: None,
            focus: None,
        };
        assert_eq!(scope.resolved_project_id(), None);

        // Entity-scoped contexts do not treat their entity id as a project.
        let scope = ContextScope {
            context_type: ContextType::Task,
            entity_id: Some("T1".to_string()),
            focus: None,
        };
        assert_eq!(scope.resolved_project_id(), None);
    }

    #[test]
    fn test_project_focus_serde_roundtrip() {
        let focus = ProjectFocus {
            project_id: "P1".to_string(),
            project_name: Some("Apollo".to_string()),
            kind: FocusKind::Task,
            entity_id: Some("T9".to_string()),
            entity_name: Some("Ship it".to_string()),
        };
        let json = serde_json::to_string(&focus).unwrap();
        let parsed: ProjectFocus = serde_json::from_str(&json).unwrap();
        assert_eq!(focus, parsed);
    }
}

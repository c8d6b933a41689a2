//! Plugin hook system domain models.
//!
//! Hooks let plugins observe and influence cycle and task boundaries.
//! Each hook receives a context value and may contribute keys back; the
//! dispatcher merges returned maps, it never hands out shared mutable
//! state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::cycle::{CycleKind, CycleTask};

/// Boundaries at which plugin hooks run (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    BeforeCycle,
    AfterCycle,
    BeforeTask,
    AfterTask,
    OnTrigger,
    OnError,
}

impl HookKind {
    /// Parse a manifest hook name. Returns `None` for names outside the
    /// closed set.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "beforeCycle" => Some(Self::BeforeCycle),
            "afterCycle" => Some(Self::AfterCycle),
            "beforeTask" => Some(Self::BeforeTask),
            "afterTask" => Some(Self::AfterTask),
            "onTrigger" => Some(Self::OnTrigger),
            "onError" => Some(Self::OnError),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeCycle => "beforeCycle",
            Self::AfterCycle => "afterCycle",
            Self::BeforeTask => "beforeTask",
            Self::AfterTask => "afterTask",
            Self::OnTrigger => "onTrigger",
            Self::OnError => "onError",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to hook handlers.
///
/// Known fields are typed; everything else hooks contribute lives in
/// `extra`. The cycle runner observes exactly two contributed fields:
/// `cancelled` (before-cycle hooks may cancel the cycle) and
/// `stopOnError` (a failing later hook aborts dispatch).
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub cycle_kind: Option<CycleKind>,
    /// Battery for cycle-level hooks.
    pub tasks: Vec<CycleTask>,
    /// Current task for task-level hooks.
    pub task: Option<CycleTask>,
    /// Error description for `onError` hooks.
    pub error: Option<String>,
    pub cancelled: bool,
    pub stop_on_error: bool,
    /// Opaque extension keys contributed by hooks, later merges override.
    pub extra: Map<String, Value>,
}

impl HookContext {
    /// Context for cycle-boundary hooks.
    pub fn for_cycle(kind: CycleKind, tasks: Vec<CycleTask>) -> Self {
        Self {
            cycle_kind: Some(kind),
            tasks,
            ..Self::default()
        }
    }

    /// Context for task-boundary hooks.
    pub fn for_task(kind: CycleKind, task: CycleTask) -> Self {
        Self {
            cycle_kind: Some(kind),
            task: Some(task),
            ..Self::default()
        }
    }

    /// Context for trigger hooks carrying the source event payload.
    pub fn for_trigger(data: Map<String, Value>) -> Self {
        Self {
            extra: data,
            ..Self::default()
        }
    }

    /// Context for error hooks.
    pub fn for_error(kind: Option<CycleKind>, error: impl Into<String>) -> Self {
        Self {
            cycle_kind: kind,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Shallow-merge a hook's returned map into this context.
    ///
    /// `cancelled` and `stopOnError` land in their typed fields; all other
    /// keys go to `extra`, overriding earlier contributions.
    pub fn merge(&mut self, contribution: Map<String, Value>) {
        for (key, value) in contribution {
            match key.as_str() {
                "cancelled" => {
                    if let Some(flag) = value.as_bool() {
                        self.cancelled = flag;
                    }
                }
                "stopOnError" => {
                    if let Some(flag) = value.as_bool() {
                        self.stop_on_error = flag;
                    }
                }
                _ => {
                    self.extra.insert(key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::approval::HdmLevel;
    use serde_json::json;

    fn task() -> CycleTask {
        CycleTask::new("security-sweep", "Security sweep", HdmLevel::Routine)
    }

    #[test]
    fn test_hook_kind_parse_closed_set() {
        assert_eq!(HookKind::parse("beforeCycle"), Some(HookKind::BeforeCycle));
        assert_eq!(HookKind::parse("afterTask"), Some(HookKind::AfterTask));
        assert_eq!(HookKind::parse("onTrigger"), Some(HookKind::OnTrigger));
        assert_eq!(HookKind::parse("onShutdown"), None);
        assert_eq!(HookKind::parse(""), None);
    }

    #[test]
    fn test_merge_later_overrides_earlier() {
        let mut ctx = HookContext::for_cycle(CycleKind::Daily, vec![task()]);

        let mut first = Map::new();
        first.insert("a".to_string(), json!(1));
        ctx.merge(first);

        let mut second = Map::new();
        second.insert("a".to_string(), json!(2));
        second.insert("b".to_string(), json!(3));
        ctx.merge(second);

        assert_eq!(ctx.extra["a"], json!(2));
        assert_eq!(ctx.extra["b"], json!(3));
    }

    #[test]
    fn test_merge_lifts_known_flags() {
        let mut ctx = HookContext::for_cycle(CycleKind::Weekly, vec![]);
        let mut contribution = Map::new();
        contribution.insert("cancelled".to_string(), json!(true));
        contribution.insert("stopOnError".to_string(), json!(true));
        ctx.merge(contribution);

        assert!(ctx.cancelled);
        assert!(ctx.stop_on_error);
        assert!(ctx.extra.is_empty());
    }

    #[test]
    fn test_non_bool_flag_ignored() {
        let mut ctx = HookContext::default();
        let mut contribution = Map::new();
        contribution.insert("cancelled".to_string(), json!("yes"));
        ctx.merge(contribution);
        assert!(!ctx.cancelled);
    }
}

//! Dependency resolver
//!
//! Turns a requested module set into an ordered execution plan against a
//! project's already-executed modules.

use crate::services::ModuleRegistry;
use std::collections::BTreeSet;
use thiserror::Error;

/// Plan resolution errors (rejected before any work starts)
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No modules requested")]
    EmptyRequest,

    #[error("Invalid modules: {}", .0.join(", "))]
    UnknownModules(Vec<String>),
}

/// Compute the execution plan for `requested`
///
/// For each requested module, in request order, its missing ancestors are
/// scheduled deepest-first followed by the module itself. Modules in
/// `executed` are never scheduled and each module appears at most once, so
/// every module's dependency precedes it in the plan or is already executed.
pub fn resolve_plan(
    registry: &ModuleRegistry,
    requested: &[String],
    executed: &BTreeSet<String>,
) -> Result<Vec<String>, ResolveError> {
    if requested.is_empty() {
        return Err(ResolveError::EmptyRequest);
    }

    let unknown: Vec<String> = requested
        .iter()
        .filter(|id| !registry.contains(id))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ResolveError::UnknownModules(unknown));
    }

    let mut plan: Vec<String> = Vec::new();
    for id in requested {
        if executed.contains(id) || plan.contains(id) {
            continue;
        }

        let mut chain: Vec<String> = registry
            .ancestors(id)
            .into_iter()
            .map(|m| m.id.clone())
            .collect();
        chain.reverse();
        chain.push(id.clone());

        for step in chain {
            if !executed.contains(&step) && !plan.contains(&step) {
                plan.push(step);
            }
        }
    }

    tracing::debug!(requested = ?requested, plan = ?plan, "Resolved execution plan");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Module;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// root -> mid -> leaf, plus an independent module
    fn chain_registry() -> ModuleRegistry {
        ModuleRegistry::new(vec![
            Module::new("root", "Root step", "cat", "m").output("A", "root_a"),
            Module::new("mid", "Middle step", "cat", "m")
                .depends_on("root", "A")
                .output("A", "mid_a"),
            Module::new("leaf", "Leaf step", "cat", "m")
                .depends_on("mid", "A")
                .output("A", "leaf_a"),
            Module::new("solo", "Independent", "cat", "m").output("A", "solo_a"),
        ])
        .unwrap()
    }

    #[test]
    fn test_dependency_scheduled_before_dependent() {
        let registry = ModuleRegistry::builtin().unwrap();
        let plan = resolve_plan(&registry, &ids(&["lead_backing"]), &set(&[])).unwrap();
        assert_eq!(plan, ids(&["vocal_instrumental", "lead_backing"]));
    }

    #[test]
    fn test_rerun_after_completion_is_empty() {
        let registry = ModuleRegistry::builtin().unwrap();
        let executed = set(&["vocal_instrumental", "lead_backing"]);
        let plan = resolve_plan(&registry, &ids(&["lead_backing"]), &executed).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_shared_ancestor_scheduled_once() {
        let registry = ModuleRegistry::builtin().unwrap();
        let plan = resolve_plan(
            &registry,
            &ids(&["male_female", "lead_backing"]),
            &set(&[]),
        )
        .unwrap();
        assert_eq!(
            plan,
            ids(&["vocal_instrumental", "male_female", "lead_backing"])
        );
    }

    #[test]
    fn test_executed_ancestor_not_rescheduled() {
        let registry = chain_registry();
        let plan = resolve_plan(&registry, &ids(&["leaf"]), &set(&["root"])).unwrap();
        assert_eq!(plan, ids(&["mid", "leaf"]));
    }

    #[test]
    fn test_deep_chain_deepest_first() {
        let registry = chain_registry();
        let plan = resolve_plan(&registry, &ids(&["solo", "leaf"]), &set(&[])).unwrap();
        assert_eq!(plan, ids(&["solo", "root", "mid", "leaf"]));
    }

    #[test]
    fn test_requested_ancestor_after_dependent_keeps_first_position() {
        let registry = chain_registry();
        let plan = resolve_plan(&registry, &ids(&["mid", "root"]), &set(&[])).unwrap();
        assert_eq!(plan, ids(&["root", "mid"]));
    }

    #[test]
    fn test_empty_request_rejected() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(
            resolve_plan(&registry, &[], &set(&[])),
            Err(ResolveError::EmptyRequest)
        );
    }

    #[test]
    fn test_unknown_module_rejected() {
        let registry = ModuleRegistry::builtin().unwrap();
        assert_eq!(
            resolve_plan(&registry, &ids(&["lead_backing", "karaoke"]), &set(&[])),
            Err(ResolveError::UnknownModules(ids(&["karaoke"])))
        );
    }

    /// Every (requested, executed) pair over the chain registry
    #[test]
    fn test_plan_properties_hold_for_all_subsets() {
        let registry = chain_registry();
        let all: Vec<String> = registry.list().iter().map(|m| m.id.clone()).collect();
        let subsets: Vec<Vec<String>> = (0u32..(1 << all.len()))
            .map(|mask| {
                all.iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .collect();

        for requested in subsets.iter().filter(|s| !s.is_empty()) {
            for executed_list in &subsets {
                let executed: BTreeSet<String> = executed_list.iter().cloned().collect();
                let plan = resolve_plan(&registry, requested, &executed).unwrap();

                for (position, id) in plan.iter().enumerate() {
                    assert!(!executed.contains(id), "{id} already executed");
                    assert_eq!(plan.iter().filter(|p| *p == id).count(), 1);
                    if let Some(parent) = registry.get(id).and_then(|m| m.depends_on.clone()) {
                        let satisfied = executed.contains(&parent)
                            || plan[..position].contains(&parent);
                        assert!(satisfied, "{parent} must precede {id}");
                    }
                }

                let mut after: BTreeSet<String> = executed.clone();
                after.extend(plan.iter().cloned());
                let rerun = resolve_plan(&registry, requested, &after).unwrap();
                assert!(rerun.is_empty(), "re-resolving must be idempotent");
            }
        }
    }
}

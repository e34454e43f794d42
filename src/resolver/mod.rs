//! Recipe dependency resolution.
//!
//! Turns a list of requested recipe ids into an [`ExecutionPlan`]: a
//! topological order in which every recipe follows the requested recipes it
//! depends on, plus the inherited steps and inputs each node runs with.
//!
//! A requested recipe depends on
//! - its nearest requested ancestor along the `ParentRecipe` chain, and
//! - any requested recipe that provides one of its shared processors.
//!
//! Ancestors that were not requested are folded into the node: their steps
//! run before the node's own, and their inputs are merged underneath.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::model::{ProcessorStep, RecipeDefinition, RecipeId, RecipeSet, Variables};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Recipe cycle detected: {}", format_path(.path))]
    Cycle { path: Vec<RecipeId> },

    #[error("Unknown recipe '{id}'{}", referenced(.referenced_by))]
    UnknownRecipe {
        id: RecipeId,
        referenced_by: Option<RecipeId>,
    },
}

fn referenced(by: &Option<RecipeId>) -> String {
    by.as_ref()
        .map(|r| format!(" (referenced by '{r}')"))
        .unwrap_or_default()
}

fn format_path(path: &[RecipeId]) -> String {
    path.iter()
        .map(RecipeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// One requested recipe with everything needed to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub id: RecipeId,
    /// Requested recipes that must finish first.
    pub depends_on: Vec<RecipeId>,
    /// Full parent chain, root first, excluding the node itself.
    pub chain: Vec<RecipeId>,
    /// Inherited steps from non-requested ancestors, then the node's own.
    pub steps: Vec<ProcessorStep>,
    /// Inputs of the whole chain, root first, child overriding.
    pub inputs: Variables,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    pub order: Vec<RecipeId>,
    pub nodes: BTreeMap<RecipeId, PlanNode>,
}

impl ExecutionPlan {
    pub fn node(&self, id: &RecipeId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Requested recipes that list `id` as a dependency.
    pub fn dependents(&self, id: &RecipeId) -> Vec<RecipeId> {
        self.nodes
            .values()
            .filter(|n| n.depends_on.contains(id))
            .map(|n| n.id.clone())
            .collect()
    }
}

/// Build an execution plan for `requested`.
pub fn resolve(requested: &[RecipeId], recipes: &RecipeSet) -> Result<ExecutionPlan, ResolveError> {
    let wanted: BTreeSet<RecipeId> = requested.iter().cloned().collect();

    for id in &wanted {
        if !recipes.contains_key(id) {
            return Err(ResolveError::UnknownRecipe {
                id: id.clone(),
                referenced_by: None,
            });
        }
    }

    let mut finished = HashSet::new();
    for id in &wanted {
        let mut path = Vec::new();
        detect_cycles(id, recipes, &mut path, &mut finished)?;
    }

    let mut nodes = BTreeMap::new();
    for id in &wanted {
        nodes.insert(id.clone(), build_node(id, &wanted, recipes)?);
    }

    let order = topological_order(&nodes)?;
    debug!(count = order.len(), "Resolved execution order");

    Ok(ExecutionPlan { order, nodes })
}

/// Depth-first walk over parent and provider links, failing on the first
/// link that returns to a node on the current path.
fn detect_cycles(
    id: &RecipeId,
    recipes: &RecipeSet,
    path: &mut Vec<RecipeId>,
    finished: &mut HashSet<RecipeId>,
) -> Result<(), ResolveError> {
    if let Some(start) = path.iter().position(|p| p == id) {
        let mut cycle = path[start..].to_vec();
        cycle.push(id.clone());
        return Err(ResolveError::Cycle { path: cycle });
    }
    if finished.contains(id) {
        return Ok(());
    }

    let recipe = recipes.get(id).ok_or_else(|| ResolveError::UnknownRecipe {
        id: id.clone(),
        referenced_by: path.last().cloned(),
    })?;

    path.push(id.clone());

    if let Some(parent) = &recipe.parent_recipe {
        detect_cycles(parent, recipes, path, finished)?;
    }
    for provider in recipe.providers() {
        if recipes.contains_key(&provider) {
            detect_cycles(&provider, recipes, path, finished)?;
        } else {
            warn!(
                recipe = %id,
                provider = %provider,
                "Shared processor provider not in recipe set; assuming installed"
            );
        }
    }

    path.pop();
    finished.insert(id.clone());
    Ok(())
}

/// Ancestors of `id`, nearest first.
fn ancestors<'a>(id: &RecipeId, recipes: &'a RecipeSet) -> Result<Vec<&'a RecipeDefinition>, ResolveError> {
    let mut chain = Vec::new();
    let mut current = recipes.get(id);
    while let Some(recipe) = current {
        let Some(parent_id) = &recipe.parent_recipe else {
            break;
        };
        let parent = recipes.get(parent_id).ok_or_else(|| ResolveError::UnknownRecipe {
            id: parent_id.clone(),
            referenced_by: Some(recipe.identifier.clone()),
        })?;
        chain.push(parent);
        current = Some(parent);
    }
    Ok(chain)
}

fn build_node(id: &RecipeId, wanted: &BTreeSet<RecipeId>, recipes: &RecipeSet) -> Result<PlanNode, ResolveError> {
    let recipe = recipes.get(id).ok_or_else(|| ResolveError::UnknownRecipe {
        id: id.clone(),
        referenced_by: None,
    })?;
    let lineage = ancestors(id, recipes)?;

    // Ancestors up to, not including, the nearest requested one.
    let nearest = lineage.iter().position(|r| wanted.contains(&r.identifier));
    let folded = &lineage[..nearest.unwrap_or(lineage.len())];

    let mut steps: Vec<ProcessorStep> = folded
        .iter()
        .rev()
        .flat_map(|r| r.process.iter().cloned())
        .collect();
    steps.extend(recipe.process.iter().cloned());

    let mut inputs = Variables::new();
    for ancestor in lineage.iter().rev() {
        inputs.extend(ancestor.input.clone());
    }
    inputs.extend(recipe.input.clone());

    let mut depends_on = BTreeSet::new();
    if let Some(i) = nearest {
        depends_on.insert(lineage[i].identifier.clone());
    }
    for provider in steps.iter().filter_map(ProcessorStep::provider) {
        if &provider != id && wanted.contains(&provider) {
            depends_on.insert(provider);
        }
    }

    Ok(PlanNode {
        id: id.clone(),
        depends_on: depends_on.into_iter().collect(),
        chain: lineage.iter().rev().map(|r| r.identifier.clone()).collect(),
        steps,
        inputs,
    })
}

/// Kahn's algorithm; ties broken by ascending identifier.
fn topological_order(nodes: &BTreeMap<RecipeId, PlanNode>) -> Result<Vec<RecipeId>, ResolveError> {
    let mut remaining: BTreeMap<&RecipeId, usize> = nodes
        .iter()
        .map(|(id, node)| (id, node.depends_on.len()))
        .collect();
    let mut ready: BTreeSet<&RecipeId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        remaining.remove(id);
        order.push(id.clone());
        for node in nodes.values() {
            if node.depends_on.contains(id) {
                if let Some(count) = remaining.get_mut(&node.id) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(&node.id);
                    }
                }
            }
        }
    }

    if !remaining.is_empty() {
        return Err(ResolveError::Cycle {
            path: remaining.into_keys().cloned().collect(),
        });
    }
    Ok(order)
}

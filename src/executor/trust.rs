//! Recipe trust verification.
//!
//! A recipe's trust record pins the content hash of the recipe and of every
//! ancestor. Any change along the chain invalidates the record until an
//! operator refreshes it with [`compute`].

use std::collections::BTreeMap;

use crate::model::{RecipeDefinition, RecipeId, RecipeSet, TrustInfo};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrustError {
    #[error("No trust info recorded for '{recipe}'")]
    Missing { recipe: RecipeId },

    #[error("Trust verification failed for '{recipe}': changed {}", join(.mismatched))]
    Mismatch {
        recipe: RecipeId,
        mismatched: Vec<RecipeId>,
    },

    #[error("Recipe '{0}' is not in the recipe set")]
    UnknownRecipe(RecipeId),

    #[error("Could not hash recipe '{recipe}': {message}")]
    Hash { recipe: RecipeId, message: String },
}

fn join(ids: &[RecipeId]) -> String {
    ids.iter().map(RecipeId::as_str).collect::<Vec<_>>().join(", ")
}

/// Parent chain of `recipe`, root first.
fn chain<'a>(recipe: &'a RecipeDefinition, recipes: &'a RecipeSet) -> Result<Vec<&'a RecipeDefinition>, TrustError> {
    let mut chain = Vec::new();
    let mut current = recipe;
    while let Some(parent) = &current.parent_recipe {
        if chain.len() > recipes.len() {
            break;
        }
        current = recipes
            .get(parent)
            .ok_or_else(|| TrustError::UnknownRecipe(parent.clone()))?;
        chain.push(current);
    }
    chain.reverse();
    Ok(chain)
}

fn hash(recipe: &RecipeDefinition) -> Result<String, TrustError> {
    recipe.content_hash().map_err(|e| TrustError::Hash {
        recipe: recipe.identifier.clone(),
        message: e.to_string(),
    })
}

/// Fresh trust info for `recipe` from the current recipe set.
pub fn compute(recipe: &RecipeDefinition, recipes: &RecipeSet) -> Result<TrustInfo, TrustError> {
    let parent_recipes = chain(recipe, recipes)?
        .into_iter()
        .map(|r| Ok((r.identifier.clone(), hash(r)?)))
        .collect::<Result<BTreeMap<RecipeId, String>, TrustError>>()?;

    Ok(TrustInfo {
        sha256: hash(recipe)?,
        parent_recipes,
    })
}

/// Compare `recipe`'s recorded trust info against the current recipe set.
///
/// Returns `Ok(false)` when no record exists and `require` is off.
pub fn verify(recipe: &RecipeDefinition, recipes: &RecipeSet, require: bool) -> Result<bool, TrustError> {
    let Some(recorded) = &recipe.trust_info else {
        if require {
            return Err(TrustError::Missing {
                recipe: recipe.identifier.clone(),
            });
        }
        return Ok(false);
    };

    let expected = compute(recipe, recipes)?;
    let mut mismatched = Vec::new();

    if recorded.sha256 != expected.sha256 {
        mismatched.push(recipe.identifier.clone());
    }
    for (id, hash) in &expected.parent_recipes {
        if recorded.parent_recipes.get(id) != Some(hash) {
            mismatched.push(id.clone());
        }
    }
    for id in recorded.parent_recipes.keys() {
        if !expected.parent_recipes.contains_key(id) {
            mismatched.push(id.clone());
        }
    }

    if mismatched.is_empty() {
        Ok(true)
    } else {
        Err(TrustError::Mismatch {
            recipe: recipe.identifier.clone(),
            mismatched,
        })
    }
}

//! Recipe file loading.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::ConfigError;
use crate::model::{RecipeDefinition, RecipeId, RecipeSet};

fn is_recipe_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), ConfigError> {
    let io = |source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if is_recipe_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Parse every `.yaml`/`.yml` recipe under `dirs`, recursively.
///
/// Missing directories are skipped. Two files defining the same identifier
/// are an error.
pub fn load_recipes<P: AsRef<Path>>(dirs: &[P]) -> Result<RecipeSet, ConfigError> {
    let mut files = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        if dir.is_dir() {
            collect_files(dir, &mut files)?;
        } else {
            debug!(dir = %dir.display(), "Recipe directory missing, skipping");
        }
    }
    files.sort();

    let mut sources: BTreeMap<RecipeId, PathBuf> = BTreeMap::new();
    let mut recipes = RecipeSet::new();
    for path in files {
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let recipe: RecipeDefinition =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::RecipeParse {
                path: path.clone(),
                source,
            })?;

        if let Some(first) = sources.get(&recipe.identifier) {
            return Err(ConfigError::DuplicateRecipe {
                id: recipe.identifier,
                first: first.clone(),
                second: path,
            });
        }
        sources.insert(recipe.identifier.clone(), path);
        recipes.insert(recipe.identifier.clone(), recipe);
    }

    info!(count = recipes.len(), "Loaded recipes");
    Ok(recipes)
}

/// Read a JSON array of recipe identifiers.
pub fn load_recipe_list(path: impl AsRef<Path>) -> Result<Vec<RecipeId>, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::RecipeList {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const DOWNLOAD: &str = r#"
Identifier: com.example.download.Firefox
Input:
  NAME: Firefox
Process:
  - Processor: URLDownloader
    Arguments:
      url: https://example.invalid/firefox.dmg
"#;

    const MUNKI: &str = r#"
Identifier: com.example.munki.Firefox
ParentRecipe: com.example.download.Firefox
Process:
  - Processor: MunkiImporter
"#;

    #[test]
    fn test_load_recipes_recursive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("firefox")).unwrap();
        fs::write(dir.path().join("firefox/download.recipe.yaml"), DOWNLOAD).unwrap();
        fs::write(dir.path().join("munki.recipe.yml"), MUNKI).unwrap();
        fs::write(dir.path().join("README.md"), "not a recipe").unwrap();

        let recipes = load_recipes(&[dir.path()]).unwrap();
        assert_eq!(recipes.len(), 2);
        let munki = &recipes[&RecipeId::from("com.example.munki.Firefox")];
        assert_eq!(
            munki.parent_recipe,
            Some(RecipeId::from("com.example.download.Firefox"))
        );
    }

    #[test]
    fn test_missing_dir_is_skipped() {
        let recipes = load_recipes(&["/nonexistent/ringrelay-recipes"]).unwrap();
        assert!(recipes.is_empty());
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.yaml"), DOWNLOAD).unwrap();
        fs::write(dir.path().join("b.yaml"), DOWNLOAD).unwrap();

        assert!(matches!(
            load_recipes(&[dir.path()]),
            Err(ConfigError::DuplicateRecipe { .. })
        ));
    }

    #[test]
    fn test_malformed_recipe_reports_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.yaml"), "Identifier: [unclosed").unwrap();

        match load_recipes(&[dir.path()]) {
            Err(ConfigError::RecipeParse { path, .. }) => assert!(path.ends_with("bad.yaml")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_recipe_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recipe_list.json");
        fs::write(&path, r#"["com.example.munki.Firefox", "com.example.munki.Chrome"]"#).unwrap();

        let list = load_recipe_list(&path).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].as_str(), "com.example.munki.Chrome");
    }
}

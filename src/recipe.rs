//! RAG recipe configuration
//!
//! A recipe names one strategy per pipeline stage plus its parameters.
//! Recipes are JSON documents, one per file, loaded once at startup and
//! immutable afterwards. Strategy identifiers are checked when the recipe
//! set is turned into runnable pipelines, so an unknown `type` fails at
//! load time rather than mid-request.

use crate::error::{Result, SageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Strategy identifier, resolved through the pipeline registry.
    #[serde(rename = "type")]
    pub strategy: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
    pub understanding: StageConfig,
    pub retrieval: StageConfig,
    pub context: StageConfig,
    pub prompt: StageConfig,
    pub llm: StageConfig,
    pub response: StageConfig,
}

pub struct RecipeSet {
    recipes: Vec<Recipe>,
}

impl RecipeSet {
    pub fn from_recipes(recipes: Vec<Recipe>) -> Result<Self> {
        if recipes.is_empty() {
            return Err(SageError::Config("no recipes configured".to_string()));
        }
        for (i, recipe) in recipes.iter().enumerate() {
            if recipes[..i].iter().any(|r| r.name == recipe.name) {
                return Err(SageError::Config(format!(
                    "duplicate recipe name '{}'",
                    recipe.name
                )));
            }
        }
        if !recipes.iter().any(|r| r.default) {
            return Err(SageError::Config(
                "no recipe is marked as default".to_string(),
            ));
        }
        Ok(Self { recipes })
    }

    /// Load every `*.json` document in a directory as one recipe.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut recipes = Vec::new();

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| SageError::Config(format!("Cannot read recipe dir {}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let recipe: Recipe = serde_json::from_str(&content).map_err(|e| {
                SageError::Config(format!("Malformed recipe {}: {}", path.display(), e))
            })?;
            info!("Loaded recipe '{}' from {}", recipe.name, path.display());
            recipes.push(recipe);
        }

        Self::from_recipes(recipes)
    }

    /// Look up a recipe by name; `None` falls back to the default recipe.
    pub fn get(&self, name: Option<&str>) -> Result<&Recipe> {
        match name {
            Some(name) => self
                .recipes
                .iter()
                .find(|r| r.name == name)
                .ok_or_else(|| SageError::Config(format!("unknown recipe '{}'", name))),
            None => self
                .recipes
                .iter()
                .find(|r| r.default)
                .ok_or_else(|| SageError::Config("no default recipe".to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(strategy: &str) -> StageConfig {
        StageConfig {
            strategy: strategy.to_string(),
            params: serde_json::json!({}),
        }
    }

    fn recipe(name: &str, default: bool) -> Recipe {
        Recipe {
            name: name.to_string(),
            description: String::new(),
            default,
            understanding: stage("passthrough"),
            retrieval: stage("cosine"),
            context: stage("standard"),
            prompt: stage("template"),
            llm: stage("chat"),
            response: stage("sql_extract"),
        }
    }

    #[test]
    fn lookup_by_name_and_default_fallback() {
        let set =
            RecipeSet::from_recipes(vec![recipe("fast", false), recipe("accurate", true)]).unwrap();
        assert_eq!(set.get(Some("fast")).unwrap().name, "fast");
        assert_eq!(set.get(None).unwrap().name, "accurate");
        assert!(set.get(Some("missing")).is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(RecipeSet::from_recipes(vec![recipe("a", true), recipe("a", false)]).is_err());
    }

    #[test]
    fn missing_default_rejected() {
        assert!(RecipeSet::from_recipes(vec![recipe("a", false)]).is_err());
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let doc = serde_json::json!({
            "name": "default",
            "description": "standard pipeline",
            "default": true,
            "understanding": {"type": "passthrough"},
            "retrieval": {"type": "cosine", "params": {"tables_limit": 3}},
            "context": {"type": "standard"},
            "prompt": {"type": "template"},
            "llm": {"type": "chat"},
            "response": {"type": "sql_extract"}
        });
        std::fs::write(
            dir.path().join("default.json"),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();

        let set = RecipeSet::load(dir.path()).unwrap();
        let recipe = set.get(None).unwrap();
        assert_eq!(recipe.name, "default");
        assert_eq!(recipe.retrieval.params["tables_limit"], 3);
    }

    #[test]
    fn malformed_document_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        assert!(matches!(
            RecipeSet::load(dir.path()),
            Err(SageError::Config(_))
        ));
    }
}

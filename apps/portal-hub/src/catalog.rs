use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single space definition. The catalog is loaded once at startup and
/// read-only afterwards; runtime membership lives in the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceDef {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Robot ids allowed to identify into this space
    #[serde(default)]
    pub robot_ids: Vec<String>,
}

fn default_capacity() -> usize {
    2
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    default_image_url: Option<String>,
    #[serde(default)]
    spaces: Vec<SpaceDef>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read space catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TOML in space catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid space catalog: {0}")]
    Invalid(String),
}

#[derive(Debug)]
pub struct SpaceCatalog {
    spaces: Vec<SpaceDef>,
}

impl SpaceCatalog {
    /// Load the catalog from a TOML file. Malformed definitions are a
    /// startup-time hard error, never a runtime one.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        let mut spaces = file.spaces;
        for space in &mut spaces {
            if space.image_url.is_none() {
                space.image_url = file.default_image_url.clone();
            }
        }
        Self::validate(spaces)
    }

    /// Construct from in-memory definitions, applying the same validation.
    pub fn from_defs(spaces: Vec<SpaceDef>) -> Result<Self, CatalogError> {
        Self::validate(spaces)
    }

    fn validate(spaces: Vec<SpaceDef>) -> Result<Self, CatalogError> {
        let mut seen = std::collections::HashSet::new();
        for space in &spaces {
            if !valid_id(&space.id) {
                return Err(CatalogError::Invalid(format!(
                    "space id '{}' must be non-empty alphanumeric with '-' or '_'",
                    space.id
                )));
            }
            if !seen.insert(space.id.clone()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate space id '{}'",
                    space.id
                )));
            }
            if space.capacity < 1 {
                return Err(CatalogError::Invalid(format!(
                    "space '{}' has capacity {}, minimum is 1",
                    space.id, space.capacity
                )));
            }
        }
        Ok(Self { spaces })
    }

    pub fn get(&self, space_id: &str) -> Option<&SpaceDef> {
        self.spaces.iter().find(|s| s.id == space_id)
    }

    pub fn list_enabled(&self) -> Vec<&SpaceDef> {
        self.spaces.iter().filter(|s| s.enabled).collect()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        version = "1"
        default_image_url = "/images/default-space.jpg"

        [[spaces]]
        id = "lobby"
        display_name = "Lobby"
        description = "The main meeting point"
        capacity = 2
        robot_ids = ["r1"]

        [[spaces]]
        id = "workshop"
        display_name = "Workshop"
        enabled = false
    "#;

    #[test]
    fn parses_and_applies_defaults() {
        let catalog = SpaceCatalog::parse(SAMPLE).unwrap();
        let lobby = catalog.get("lobby").unwrap();
        assert!(lobby.enabled);
        assert_eq!(lobby.capacity, 2);
        assert_eq!(lobby.robot_ids, vec!["r1"]);
        assert_eq!(
            lobby.image_url.as_deref(),
            Some("/images/default-space.jpg")
        );
        assert!(catalog.get("cellar").is_none());
    }

    #[test]
    fn list_enabled_filters_disabled_spaces() {
        let catalog = SpaceCatalog::parse(SAMPLE).unwrap();
        let enabled: Vec<&str> = catalog.list_enabled().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(enabled, vec!["lobby"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let raw = r#"
            [[spaces]]
            id = "lobby"
            display_name = "Lobby"

            [[spaces]]
            id = "lobby"
            display_name = "Lobby again"
        "#;
        let err = SpaceCatalog::parse(raw).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let raw = r#"
            [[spaces]]
            id = "lobby"
            display_name = "Lobby"
            capacity = 0
        "#;
        let err = SpaceCatalog::parse(raw).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }

    #[test]
    fn ill_formed_ids_are_rejected() {
        let raw = r#"
            [[spaces]]
            id = "lobby room"
            display_name = "Lobby"
        "#;
        let err = SpaceCatalog::parse(raw).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }
}

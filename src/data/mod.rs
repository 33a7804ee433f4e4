//! Core data models for the recipe list
//!
//! This module contains the recipe record as served by the remote endpoint,
//! the response envelope, and the per-record validation used to detect
//! malformed entries.

pub mod recipes;

pub use recipes::{FetchError, RecipeClient, DEFAULT_ENDPOINT};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single recipe as returned by the recipe endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Cuisine category (e.g. "Italian")
    pub cuisine: String,
    /// Display name of the recipe
    pub name: String,
    /// URL of the full-size photo
    #[serde(default)]
    pub photo_url_large: Option<String>,
    /// URL of the thumbnail photo, the one we cache locally
    #[serde(default)]
    pub photo_url_small: Option<String>,
    /// Unique identifier, stable across fetches
    pub uuid: String,
    /// URL of the original recipe page
    #[serde(default)]
    pub source_url: Option<String>,
    /// URL of an external video for the recipe
    #[serde(default)]
    pub youtube_url: Option<String>,
}

/// Wire envelope for the recipe endpoint: `{ "recipes": [...] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeResponse {
    pub recipes: Vec<Recipe>,
}

/// Required recipe fields that may be reported missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredField {
    Uuid,
    Name,
    Cuisine,
}

impl RequiredField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredField::Uuid => "uuid",
            RequiredField::Name => "name",
            RequiredField::Cuisine => "cuisine",
        }
    }
}

/// A recipe record missing one or more required non-empty fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecipe {
    /// The record's uuid as received (may itself be empty)
    pub uuid: String,
    /// Every required field that was empty
    pub missing: Vec<RequiredField>,
}

impl fmt::Display for MalformedRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.missing.iter().map(RequiredField::as_str).collect();
        let uuid = if self.uuid.is_empty() {
            "<no uuid>"
        } else {
            &self.uuid
        };
        write!(f, "recipe {} is missing {}", uuid, fields.join(", "))
    }
}

impl Recipe {
    /// Stable identifier used to key the image cache
    pub fn id(&self) -> &str {
        &self.uuid
    }

    /// Checks that uuid, name and cuisine are all non-empty
    ///
    /// Whitespace-only values count as empty.
    pub fn validate(&self) -> Result<(), MalformedRecipe> {
        let mut missing = Vec::new();
        if self.uuid.trim().is_empty() {
            missing.push(RequiredField::Uuid);
        }
        if self.name.trim().is_empty() {
            missing.push(RequiredField::Name);
        }
        if self.cuisine.trim().is_empty() {
            missing.push(RequiredField::Cuisine);
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MalformedRecipe {
                uuid: self.uuid.clone(),
                missing,
            })
        }
    }
}

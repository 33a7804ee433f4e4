//! Recipe fetch pipeline
//!
//! Retrieves the recipe list, validates it, publishes it, then makes sure
//! each recipe's thumbnail is in the image cache. Readers see either the
//! previous list or the complete new one, never a partial update.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::cache::{CachedImage, EnsureOutcome, EnsureResult, ImageCache};
use crate::data::{FetchError, Recipe, RecipeClient};

/// What to do with records missing a required field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Drop malformed records and keep the rest
    #[default]
    Filter,
    /// Fail the whole fetch if any record is malformed
    Reject,
}

/// Configuration for the fetch pipeline
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Handling of malformed records
    pub malformed_policy: MalformedPolicy,
    /// Upper bound on image downloads running at once
    pub max_concurrent_downloads: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            malformed_policy: MalformedPolicy::Filter,
            max_concurrent_downloads: 4,
        }
    }
}

/// Tally of image cache outcomes from the last successful fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSummary {
    /// Images fetched during this run
    pub downloaded: usize,
    /// Images that were already on disk
    pub already_cached: usize,
    /// Recipes with no usable thumbnail URL
    pub no_image: usize,
    /// Downloads that failed
    pub failed: usize,
}

impl ImageSummary {
    fn record(&mut self, result: &EnsureResult) {
        match result {
            Ok(EnsureOutcome::Downloaded(_)) => self.downloaded += 1,
            Ok(EnsureOutcome::AlreadyCached) => self.already_cached += 1,
            Ok(EnsureOutcome::NoImage) => self.no_image += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Everything the presentation layer reads
#[derive(Debug, Clone, Default)]
pub struct FetchState {
    /// Recipes from the last successful fetch, in server order
    pub recipes: Vec<Recipe>,
    /// Description of the last failure, cleared by the next success
    pub error_message: Option<String>,
    /// When the list was last replaced
    pub last_refresh: Option<DateTime<Local>>,
    /// Image outcomes of the last successful fetch
    pub images: ImageSummary,
    /// Ids of recipes whose image download failed in the last fetch
    pub failed_images: Vec<String>,
}

impl FetchState {
    /// Returns true if the image for `id` failed to download last time
    pub fn image_failed(&self, id: &str) -> bool {
        self.failed_images.iter().any(|failed| failed == id)
    }
}

/// Fetches recipes and keeps their thumbnails cached
pub struct Fetcher {
    client: RecipeClient,
    images: Arc<ImageCache>,
    config: FetcherConfig,
    state: RwLock<FetchState>,
}

impl Fetcher {
    /// Creates a Fetcher with the default configuration
    pub fn new(client: RecipeClient, images: Arc<ImageCache>) -> Self {
        Self {
            client,
            images,
            config: FetcherConfig::default(),
            state: RwLock::new(FetchState::default()),
        }
    }

    /// Replaces the pipeline configuration
    pub fn with_config(mut self, config: FetcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Snapshot of the current state
    pub fn state(&self) -> FetchState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recipes from the last successful fetch
    pub fn recipes(&self) -> Vec<Recipe> {
        self.state().recipes
    }

    /// Message describing the last failure, if the last fetch failed
    pub fn error_message(&self) -> Option<String> {
        self.state().error_message
    }

    /// Looks up the cached thumbnail for a recipe
    pub fn image(&self, id: &str) -> Option<CachedImage> {
        self.images.retrieve(id)
    }

    /// The image cache this fetcher populates
    pub fn images(&self) -> &Arc<ImageCache> {
        &self.images
    }

    /// Runs one full fetch
    ///
    /// On failure the previous list is kept and the error message is set.
    /// On success the list is replaced and the error message cleared before
    /// any image is downloaded; failed downloads are only counted.
    ///
    /// Dropping the returned future at any point leaves the state as it was
    /// before the fetch, or with the new list already published.
    pub async fn fetch(&self) -> FetchState {
        let recipes = match self.load().await {
            Ok(recipes) => recipes,
            Err(e) => {
                warn!(error = %e, endpoint = %self.client.endpoint(), "Recipe fetch failed");
                self.update(|state| state.error_message = Some(e.user_message()));
                return self.state();
            }
        };

        info!(count = recipes.len(), "Recipe list updated");
        self.update(|state| {
            state.recipes = recipes.clone();
            state.error_message = None;
            state.last_refresh = Some(Local::now());
        });

        let (summary, failed) = self.cache_images(&recipes).await;
        self.update(|state| {
            state.images = summary;
            state.failed_images = failed;
        });

        self.state()
    }

    async fn load(&self) -> Result<Vec<Recipe>, FetchError> {
        let recipes = self.client.fetch_recipes().await?;
        apply_policy(recipes, self.config.malformed_policy)
    }

    /// Ensures every thumbnail, a bounded number at a time
    ///
    /// Returns the tally and the ids whose download failed.
    async fn cache_images(&self, recipes: &[Recipe]) -> (ImageSummary, Vec<String>) {
        let mut summary = ImageSummary::default();
        let limit = self.config.max_concurrent_downloads.max(1);

        let with_url: Vec<&Recipe> = recipes
            .iter()
            .filter(|recipe| recipe.photo_url_small.is_some())
            .collect();
        summary.no_image = recipes.len() - with_url.len();

        let results: Vec<(&str, EnsureResult)> = stream::iter(with_url)
            .map(|recipe| async move {
                let result = self
                    .images
                    .ensure(recipe.id(), recipe.photo_url_small.as_deref())
                    .await;
                (recipe.id(), result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut failed = Vec::new();
        for (id, result) in &results {
            if let Err(e) = result {
                warn!(id = %id, error = %e, "Image download failed");
                failed.push(id.to_string());
            }
            summary.record(result);
        }

        debug!(?summary, "Image cache pass finished");
        (summary, failed)
    }

    fn update(&self, apply: impl FnOnce(&mut FetchState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state);
    }
}

/// Validates every record and applies the malformed-record policy
fn apply_policy(recipes: Vec<Recipe>, policy: MalformedPolicy) -> Result<Vec<Recipe>, FetchError> {
    let mut valid = Vec::with_capacity(recipes.len());
    let mut malformed = Vec::new();

    for recipe in recipes {
        match recipe.validate() {
            Ok(()) => valid.push(recipe),
            Err(problem) => {
                warn!(%problem, "Malformed recipe");
                malformed.push(problem);
            }
        }
    }

    let Some(first) = malformed.first() else {
        return Ok(valid);
    };

    match policy {
        MalformedPolicy::Filter => {
            warn!(dropped = malformed.len(), kept = valid.len(), "Dropped malformed recipes");
            Ok(valid)
        }
        MalformedPolicy::Reject => Err(FetchError::Malformed {
            count: malformed.len(),
            first_id: first.uuid.clone(),
        }),
    }
}

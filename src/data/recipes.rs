//! Recipe endpoint client
//!
//! Fetches the recipe list with a single GET, checks the status code and
//! decodes the body into [`Recipe`] records.

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use super::{Recipe, RecipeResponse};

/// Endpoint serving the full recipe list
pub const DEFAULT_ENDPOINT: &str = "https://d3jbb8n5wk0qxi.cloudfront.net/recipes.json";

/// Errors that can occur when fetching the recipe list
#[derive(Debug, Error)]
pub enum FetchError {
    /// The configured endpoint is not a usable http(s) URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Server answered with a status other than 200
    #[error("Server returned HTTP status {0}")]
    HttpStatus(u16),

    /// Response body does not match the recipe list shape
    #[error("Failed to decode recipe list: {0}")]
    Decoding(#[from] serde_json::Error),

    /// At least one record is missing a required field
    #[error("{count} malformed recipe(s), first: {first_id}")]
    Malformed { count: usize, first_id: String },
}

impl FetchError {
    /// Caller-facing description of the failure category
    ///
    /// Never includes the underlying error text.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::InvalidEndpoint(_) => "Invalid recipe endpoint configured".to_string(),
            FetchError::RequestFailed(e) if e.is_timeout() => {
                "The recipe server took too long to respond".to_string()
            }
            FetchError::RequestFailed(_) => "Unable to reach the recipe server".to_string(),
            FetchError::HttpStatus(code) => {
                format!("Server error: received HTTP status {}", code)
            }
            FetchError::Decoding(_) => {
                "Recipe data was malformed and could not be read".to_string()
            }
            FetchError::Malformed { count, .. } => {
                format!("Recipe data contained {} malformed entries", count)
            }
        }
    }
}

/// Client for fetching the recipe list
#[derive(Debug, Clone)]
pub struct RecipeClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Endpoint URL, parsed on every fetch
    endpoint: String,
}

impl Default for RecipeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RecipeClient {
    /// Creates a new RecipeClient pointed at the default endpoint
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Replaces the HTTP client (e.g. one configured with a timeout)
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Replaces the endpoint URL
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Returns the configured endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetches and decodes the recipe list
    ///
    /// # Returns
    /// * `Ok(Vec<Recipe>)` - Records in server order
    /// * `Err(FetchError)` - Bad endpoint, transport failure, non-200 status
    ///   or a body that does not match the expected shape
    pub async fn fetch_recipes(&self) -> Result<Vec<Recipe>, FetchError> {
        let url = parse_endpoint(&self.endpoint)?;

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        let parsed: RecipeResponse = serde_json::from_slice(&body)?;

        Ok(parsed.recipes)
    }
}

/// Parses the endpoint, accepting only http and https URLs
fn parse_endpoint(endpoint: &str) -> Result<Url, FetchError> {
    let url =
        Url::parse(endpoint).map_err(|_| FetchError::InvalidEndpoint(endpoint.to_string()))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(FetchError::InvalidEndpoint(endpoint.to_string())),
    }
}

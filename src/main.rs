//! Recipes - fetch the recipe list and keep recipe photos cached
//!
//! Command-line front end over the fetch pipeline and image cache.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use recipes::cli::{Cli, Command};
use recipes::{Config, Fetcher, ImageCache};

/// Sets up stderr logging; `RUST_LOG` takes precedence over `--verbose`
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "recipes=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Fetches the list, caches thumbnails and prints the result
async fn run_fetch(config: &Config, client: Client, images: Arc<ImageCache>) -> ExitCode {
    let fetcher = Fetcher::new(config.recipe_client(client), Arc::clone(&images))
        .with_config(config.fetcher_config());

    let state = tokio::select! {
        state = fetcher.fetch() => state,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Fetch cancelled");
            return ExitCode::from(130);
        }
    };

    if let Some(message) = &state.error_message {
        eprintln!("Error: {}", message);
        return ExitCode::FAILURE;
    }

    for recipe in &state.recipes {
        let status = if images.contains(recipe.id()) {
            "cached"
        } else if state.image_failed(recipe.id()) {
            "failed"
        } else {
            "no image"
        };
        println!("{:<40} {:<16} [{}]", recipe.name, recipe.cuisine, status);
    }

    let summary = state.images;
    println!(
        "{} recipes: {} downloaded, {} already cached, {} without image, {} failed",
        state.recipes.len(),
        summary.downloaded,
        summary.already_cached,
        summary.no_image,
        summary.failed
    );

    ExitCode::SUCCESS
}

/// Prints details of one cached image
fn run_show(images: &ImageCache, uuid: &str) -> ExitCode {
    match images.retrieve(uuid) {
        Some(image) => {
            println!(
                "{}: {:?}, {}x{}, {} bytes, {}",
                image.id,
                image.format,
                image.width,
                image.height,
                image.bytes.len(),
                image.path.display()
            );
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("No cached image for {}", uuid);
            ExitCode::FAILURE
        }
    }
}

/// Deletes every cached image
async fn run_purge(images: &ImageCache) -> ExitCode {
    match images.purge_all().await {
        Ok(removed) => {
            println!("Removed {} cached images", removed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    let client = config.http_client()?;
    let Some(images) = config.image_cache(client.clone()) else {
        eprintln!("Error: could not determine a cache directory, pass --cache-dir");
        return Ok(ExitCode::FAILURE);
    };
    let images = Arc::new(images);

    let code = match cli.command() {
        Command::Fetch => run_fetch(&config, client, images).await,
        Command::Show { uuid } => run_show(&images, &uuid),
        Command::Purge => run_purge(&images).await,
    };

    Ok(code)
}

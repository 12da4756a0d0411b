//! Query the movie catalog directly and print the decoded JSON.
//! Usage:
//!   cargo run --bin catalog_probe -- movie <tmdb_id>
//!   cargo run --bin catalog_probe -- taxonomy <genres|providers|languages|certifications>
//!   cargo run --bin catalog_probe -- randomise [genre_id,...] [count]
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use featured::app::MovieCard;
use featured::config::Config;
use featured::filters::{FilterResolver, FilterSelection};
use featured::randomiser::Randomiser;
use featured::tmdb::{CatalogApi, TaxonomyKind, TmdbClient};
use serde_json::json;
use std::env;
use std::sync::Arc;

fn usage() {
    eprintln!("Usage: cargo run --bin catalog_probe -- movie <tmdb_id>");
    eprintln!("       cargo run --bin catalog_probe -- taxonomy <kind>");
    eprintln!("       cargo run --bin catalog_probe -- randomise [genre_id,...] [count]");
}

fn parse_genres(raw: Option<&String>) -> Result<FilterSelection> {
    let mut selection = FilterSelection::default();
    if let Some(raw) = raw.filter(|r| !r.is_empty()) {
        for id in raw.split(',') {
            let id: i32 = id.trim().parse().context("genre ids must be integers")?;
            selection.genres.insert(id);
        }
    }
    Ok(selection)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    let config = Config::from_env()?;
    let client = Arc::new(TmdbClient::from_config(&config)?);

    let output = match args[1].as_str() {
        "movie" => {
            let id: i32 = args
                .get(2)
                .context("tmdb_id is required")?
                .parse()
                .context("tmdb_id must be an integer")?;
            let movie = client.fetch_movie_detail(id).await?;
            let providers = client.fetch_movie_providers(id).await?;
            json!({
                "movie": MovieCard::from(&movie),
                "directors": movie.directors().iter().map(|c| &c.name).collect::<Vec<_>>(),
                "providers": providers,
                "region": client.region(),
            })
        }
        "taxonomy" => {
            let kind: TaxonomyKind = args
                .get(2)
                .context("taxonomy kind is required")?
                .parse()
                .map_err(anyhow::Error::msg)?;
            let taxonomy = client.fetch_taxonomy(kind).await?;
            json!({ "count": taxonomy.len(), "taxonomy": taxonomy })
        }
        "randomise" => {
            let selection = parse_genres(args.get(2))?;
            let count: usize = match args.get(3) {
                Some(raw) => raw.parse().context("count must be an integer")?,
                None => 3,
            };
            let resolver = FilterResolver::new(config.certification_country.clone(), Default::default());
            let randomiser = Randomiser::new(client, resolver);
            let query = randomiser.resolver().resolve(&selection)?;
            let outcome = randomiser.randomise(&selection, count).await;
            if let Some(e) = outcome.failure {
                bail!("randomise failed: {e}");
            }
            json!({
                "query": query.pairs(),
                "total_pages": outcome.total_pages,
                "movies": outcome.movies.iter().map(MovieCard::from).collect::<Vec<_>>(),
            })
        }
        other => {
            usage();
            bail!("unknown command '{other}'");
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

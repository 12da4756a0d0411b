use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::filters::NormalizedQuery;
use crate::models::{Certification, DiscoveryPage, Genre, Language, Movie, MovieId, Provider};

mod client;
mod error;

pub use client::{TmdbClient, DEFAULT_BASE_URL};
pub use error::{CatalogError, CatalogResult};

/// Remote movie catalog. Every method issues exactly one GET.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn fetch_total_pages(&self, query: &NormalizedQuery) -> CatalogResult<u32>;
    async fn discover_page(&self, query: &NormalizedQuery, page: u32)
        -> CatalogResult<DiscoveryPage>;
    async fn fetch_movie_detail(&self, id: MovieId) -> CatalogResult<Movie>;
    async fn fetch_taxonomy(&self, kind: TaxonomyKind) -> CatalogResult<Taxonomy>;
    async fn fetch_movie_providers(&self, id: MovieId) -> CatalogResult<Vec<Provider>>;
    async fn fetch_movie_list(
        &self,
        endpoint: MovieListEndpoint,
        page: u32,
    ) -> CatalogResult<DiscoveryPage>;
    async fn search_movies(&self, query: &str, page: u32) -> CatalogResult<DiscoveryPage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaxonomyKind {
    Genres,
    Providers,
    Languages,
    Certifications,
}

impl FromStr for TaxonomyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "genres" => Ok(TaxonomyKind::Genres),
            "providers" => Ok(TaxonomyKind::Providers),
            "languages" => Ok(TaxonomyKind::Languages),
            "certifications" => Ok(TaxonomyKind::Certifications),
            other => Err(format!("unknown taxonomy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Taxonomy {
    Genres(Vec<Genre>),
    Providers(Vec<Provider>),
    Languages(Vec<Language>),
    Certifications(Vec<Certification>),
}

impl Taxonomy {
    pub fn len(&self) -> usize {
        match self {
            Taxonomy::Genres(v) => v.len(),
            Taxonomy::Providers(v) => v.len(),
            Taxonomy::Languages(v) => v.len(),
            Taxonomy::Certifications(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovieListEndpoint {
    NowPlaying,
    Popular,
    TopRated,
    Upcoming,
}

impl MovieListEndpoint {
    pub fn path_segment(&self) -> &'static str {
        match self {
            MovieListEndpoint::NowPlaying => "now_playing",
            MovieListEndpoint::Popular => "popular",
            MovieListEndpoint::TopRated => "top_rated",
            MovieListEndpoint::Upcoming => "upcoming",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MovieListEndpoint::NowPlaying => "Now Playing",
            MovieListEndpoint::Popular => "Popular",
            MovieListEndpoint::TopRated => "Top Rated",
            MovieListEndpoint::Upcoming => "Upcoming",
        }
    }
}

impl fmt::Display for MovieListEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for MovieListEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "now_playing" => Ok(MovieListEndpoint::NowPlaying),
            "popular" => Ok(MovieListEndpoint::Popular),
            "top_rated" => Ok(MovieListEndpoint::TopRated),
            "upcoming" => Ok(MovieListEndpoint::Upcoming),
            other => Err(format!("unknown movie list '{other}'")),
        }
    }
}

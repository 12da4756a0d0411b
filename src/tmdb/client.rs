use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{CatalogApi, CatalogError, CatalogResult, MovieListEndpoint, Taxonomy, TaxonomyKind};
use crate::config::Config;
use crate::filters::NormalizedQuery;
use crate::models::{Certification, DiscoveryPage, Genre, Language, Movie, MovieId, Provider};

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3/";
const RESPONSE_LANGUAGE: &str = "en-US";

/// TMDB v3 client. Holds no per-call state, so one instance is shared by
/// every concurrent randomiser run.
#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: Url,
    api_key: String,
    region: String,
    certification_country: String,
}

impl TmdbClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        region: impl Into<String>,
        certification_country: impl Into<String>,
    ) -> Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid TMDB base URL '{base_url}'"))?;
        let user_agent = format!("featured/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            region: region.into(),
            certification_country: certification_country.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.tmdb_api_key.clone(),
            &config.tmdb_base_url,
            config.watch_region.clone(),
            config.certification_country.clone(),
        )
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn discover_query(&self, query: &NormalizedQuery, page: u32) -> Vec<(&'static str, String)> {
        let mut params = query.pairs();
        params.push(("page", page.to_string()));
        params.push(("include_adult", "false".to_string()));
        params.push(("watch_region", self.region.clone()));
        params
    }

    #[instrument(skip(self, query))]
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> CatalogResult<T> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CatalogError::InvalidEndpoint(format!("{path}: {e}")))?;
        let request = self
            .client
            .get(url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .build()
            .map_err(|e| CatalogError::InvalidEndpoint(format!("{path}: {e}")))?;

        debug!(params = ?query, "TMDB request");

        let res = self
            .client
            .execute(request)
            .await
            .map_err(|e| CatalogError::Network(e.without_url().to_string()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(CatalogError::InvalidResponse {
                status: status.as_u16(),
            });
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| CatalogError::Network(e.without_url().to_string()))?;
        if bytes.is_empty() {
            return Err(CatalogError::NoData);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn fetch_total_pages(&self, query: &NormalizedQuery) -> CatalogResult<u32> {
        #[derive(Deserialize)]
        struct TotalPages {
            total_pages: u32,
        }

        let params = self.discover_query(query, 1);
        let data: TotalPages = self.get_json("discover/movie", &params).await?;
        Ok(data.total_pages)
    }

    async fn discover_page(
        &self,
        query: &NormalizedQuery,
        page: u32,
    ) -> CatalogResult<DiscoveryPage> {
        let params = self.discover_query(query, page);
        self.get_json("discover/movie", &params).await
    }

    async fn fetch_movie_detail(&self, id: MovieId) -> CatalogResult<Movie> {
        let path = format!("movie/{id}");
        let params = [
            ("append_to_response", "credits,videos".to_string()),
            ("language", RESPONSE_LANGUAGE.to_string()),
        ];
        self.get_json(&path, &params).await
    }

    async fn fetch_taxonomy(&self, kind: TaxonomyKind) -> CatalogResult<Taxonomy> {
        #[derive(Deserialize)]
        struct GenreResponse {
            genres: Vec<Genre>,
        }
        #[derive(Deserialize)]
        struct ProviderResponse {
            results: Vec<Provider>,
        }
        #[derive(Deserialize)]
        struct CertificationResponse {
            certifications: HashMap<String, Vec<Certification>>,
        }

        match kind {
            TaxonomyKind::Genres => {
                let params = [("language", RESPONSE_LANGUAGE.to_string())];
                let data: GenreResponse = self.get_json("genre/movie/list", &params).await?;
                Ok(Taxonomy::Genres(data.genres))
            }
            TaxonomyKind::Providers => {
                let params = [
                    ("language", RESPONSE_LANGUAGE.to_string()),
                    ("watch_region", self.region.clone()),
                ];
                let data: ProviderResponse =
                    self.get_json("watch/providers/movie", &params).await?;
                Ok(Taxonomy::Providers(data.results))
            }
            TaxonomyKind::Languages => {
                let data: Vec<Language> = self.get_json("configuration/languages", &[]).await?;
                Ok(Taxonomy::Languages(data))
            }
            TaxonomyKind::Certifications => {
                let mut data: CertificationResponse =
                    self.get_json("certification/movie/list", &[]).await?;
                let mut list = data
                    .certifications
                    .remove(&self.certification_country)
                    .unwrap_or_default();
                list.sort_by_key(|c| c.order);
                Ok(Taxonomy::Certifications(list))
            }
        }
    }

    async fn fetch_movie_providers(&self, id: MovieId) -> CatalogResult<Vec<Provider>> {
        #[derive(Deserialize)]
        struct WatchProviders {
            #[serde(default)]
            results: HashMap<String, RegionProviders>,
        }
        #[derive(Deserialize)]
        struct RegionProviders {
            #[serde(default)]
            flatrate: Vec<Provider>,
        }

        let path = format!("movie/{id}/watch/providers");
        let mut data: WatchProviders = self.get_json(&path, &[]).await?;
        Ok(data
            .results
            .remove(&self.region)
            .map(|r| r.flatrate)
            .unwrap_or_default())
    }

    async fn fetch_movie_list(
        &self,
        endpoint: MovieListEndpoint,
        page: u32,
    ) -> CatalogResult<DiscoveryPage> {
        let path = format!("movie/{}", endpoint.path_segment());
        let params = [
            ("language", RESPONSE_LANGUAGE.to_string()),
            ("page", page.to_string()),
            ("region", self.region.clone()),
        ];
        self.get_json(&path, &params).await
    }

    async fn search_movies(&self, query: &str, page: u32) -> CatalogResult<DiscoveryPage> {
        let params = [
            ("query", query.to_string()),
            ("language", RESPONSE_LANGUAGE.to_string()),
            ("page", page.to_string()),
            ("include_adult", "false".to_string()),
        ];
        self.get_json("search/movie", &params).await
    }
}

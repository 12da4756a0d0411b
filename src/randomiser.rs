use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::filters::{FilterResolver, FilterSelection, NormalizedQuery};
use crate::models::{Movie, MovieId};
use crate::sampler::sample_pages;
use crate::tmdb::{CatalogApi, CatalogError};

/// Result of one randomiser run.
///
/// `movies` follow ascending sampled-page order. An empty list is ambiguous on its own:
/// check `failure` to tell a failed page-count lookup apart from "nothing matched".
#[derive(Debug, Default)]
pub struct RandomiseOutcome {
    pub movies: Vec<Movie>,
    pub total_pages: Option<u32>,
    pub failure: Option<CatalogError>,
}

impl RandomiseOutcome {
    fn failed(error: CatalogError) -> Self {
        Self {
            movies: Vec::new(),
            total_pages: None,
            failure: Some(error),
        }
    }
}

/// Picks random movies matching a filter selection.
///
/// Each run resolves filters, looks up the page count, samples pages, then
/// fans out one discovery call per page and one detail call per picked id.
/// Individual page or detail failures are skipped; only a failed page-count
/// lookup ends the run early. Runs share no state apart from the RNG, so
/// overlapping calls are independent.
pub struct Randomiser {
    catalog: Arc<dyn CatalogApi>,
    resolver: FilterResolver,
    rng: Mutex<StdRng>,
}

impl Randomiser {
    pub fn new(catalog: Arc<dyn CatalogApi>, resolver: FilterResolver) -> Self {
        Self {
            catalog,
            resolver,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn resolver(&self) -> &FilterResolver {
        &self.resolver
    }

    pub async fn randomise(&self, selection: &FilterSelection, count: usize) -> RandomiseOutcome {
        // Reduced once so every page in this run queries the same provider.
        let reduced = self.with_rng(|rng| selection.with_single_provider(rng));
        let query = match self.resolver.resolve(&reduced) {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "Rejected filter selection");
                return RandomiseOutcome::failed(e);
            }
        };

        let total_pages = match self.catalog.fetch_total_pages(&query).await {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "Failed to fetch total pages");
                return RandomiseOutcome::failed(e);
            }
        };

        let pages = self.with_rng(|rng| sample_pages(i64::from(total_pages), count, rng));
        info!(total_pages, requested = count, sampled = ?pages, "Sampled discovery pages");

        let ids = self.pick_from_pages(&query, &pages).await;
        let movies = self.fetch_details(&ids).await;
        info!(
            picked = ids.len(),
            resolved = movies.len(),
            "Randomiser run completed"
        );

        RandomiseOutcome {
            movies,
            total_pages: Some(total_pages),
            failure: None,
        }
    }

    /// Runs [`Randomiser::randomise`] on a tokio task and hands the outcome to
    /// `completion` exactly once.
    pub fn spawn<F>(
        self: &Arc<Self>,
        selection: FilterSelection,
        count: usize,
        completion: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(RandomiseOutcome) + Send + 'static,
    {
        let randomiser = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = randomiser.randomise(&selection, count).await;
            completion(outcome);
        })
    }

    async fn pick_from_pages(&self, query: &NormalizedQuery, pages: &BTreeSet<u32>) -> Vec<MovieId> {
        let calls = pages.iter().map(|&page| async move {
            (page, self.catalog.discover_page(query, page).await)
        });
        let settled = join_all(calls).await;

        let mut ids = Vec::with_capacity(settled.len());
        for (page, result) in settled {
            match result {
                Ok(discovered) => {
                    let picked = self.with_rng(|rng| discovered.results.choose(rng).map(|m| m.id));
                    match picked {
                        Some(id) => {
                            debug!(page, movie_id = id, "Picked movie from page");
                            ids.push(id);
                        }
                        None => debug!(page, "Discovery page had no results"),
                    }
                }
                Err(e) => warn!(page, error = %e, "Discovery page failed, skipping"),
            }
        }
        ids
    }

    async fn fetch_details(&self, ids: &[MovieId]) -> Vec<Movie> {
        let calls = ids.iter().map(|&id| async move {
            (id, self.catalog.fetch_movie_detail(id).await)
        });
        let settled = join_all(calls).await;

        let mut movies = Vec::with_capacity(settled.len());
        for (id, result) in settled {
            match result {
                Ok(movie) => movies.push(movie),
                Err(e) => warn!(movie_id = id, error = %e, "Movie detail failed, skipping"),
            }
        }
        movies
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

use chrono::{Datelike, Local};
use rand::seq::IteratorRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::Certification;
use crate::tmdb::CatalogError;

pub const EARLIEST_YEAR: i32 = 1920;
const DEFAULT_CERTIFICATION_COUNTRY: &str = "NL";
const DEFAULT_BLOCKED_CERTIFICATIONS: [&str; 3] = ["14", "16", "18"];
const BLOCKED_BANDS: usize = 3;
const MAX_VOTE_CEILING: u8 = 10;

/// A decade filter and the concrete release years it stands for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Era {
    pub decade: i32,
    pub years: Vec<i32>,
}

impl Era {
    /// Expands the decade containing `start` into its years, clipped to
    /// `[EARLIEST_YEAR, current_year]`. Returns `None` when nothing is left.
    pub fn decade(start: i32, current_year: i32) -> Option<Self> {
        let decade = start.checked_sub(start.rem_euclid(10))?;
        let first = decade.max(EARLIEST_YEAR);
        let last = decade.checked_add(9)?.min(current_year);
        if first > last {
            return None;
        }
        Some(Self {
            decade,
            years: (first..=last).collect(),
        })
    }

    pub fn label(&self) -> String {
        format!("{}s", self.decade)
    }
}

/// Every decade from 1920 up to and including the one containing `current_year`.
pub fn era_catalog(current_year: i32) -> Vec<Era> {
    (EARLIEST_YEAR..=current_year)
        .step_by(10)
        .filter_map(|start| Era::decade(start, current_year))
        .collect()
}

pub fn current_year() -> i32 {
    Local::now().year()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreToken {
    Certification(String),
    MaxVote(u8),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    #[serde(default)]
    pub genres: BTreeSet<i32>,
    #[serde(default)]
    pub providers: BTreeSet<i32>,
    #[serde(default)]
    pub languages: BTreeSet<String>,
    #[serde(default)]
    pub eras: BTreeSet<Era>,
    #[serde(default)]
    pub scores: BTreeSet<ScoreToken>,
}

impl FilterSelection {
    /// Copy of the selection with at most one provider, picked uniformly.
    /// Several provider ids narrow the catalog results instead of widening them.
    pub fn with_single_provider<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let mut reduced = self.clone();
        reduced.providers = self
            .providers
            .iter()
            .copied()
            .choose(rng)
            .into_iter()
            .collect();
        reduced
    }
}

/// Certification codes the randomiser is never allowed to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificationPolicy {
    blocked: BTreeSet<String>,
}

impl Default for CertificationPolicy {
    fn default() -> Self {
        Self::blocking(DEFAULT_BLOCKED_CERTIFICATIONS)
    }
}

impl CertificationPolicy {
    pub fn blocking<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked: codes.into_iter().map(Into::into).collect(),
        }
    }

    /// Blocks the three most restrictive bands of a fetched certification list.
    pub fn from_catalog(certifications: &[Certification]) -> Self {
        let mut ranked: Vec<&Certification> = certifications.iter().collect();
        ranked.sort_by(|a, b| b.order.cmp(&a.order));
        Self::blocking(
            ranked
                .into_iter()
                .take(BLOCKED_BANDS)
                .map(|c| c.certification.clone()),
        )
    }

    pub fn allows(&self, code: &str) -> bool {
        !self.blocked.contains(code)
    }

    pub fn blocked(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(String::as_str)
    }
}

/// Catalog query parameters derived from a [`FilterSelection`]. `None` means
/// the dimension is not filtered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub with_genres: Option<String>,
    pub with_watch_providers: Option<String>,
    pub with_original_language: Option<String>,
    pub primary_release_year: Option<String>,
    pub certification: Option<String>,
    pub certification_country: Option<String>,
    pub vote_average_lte: Option<String>,
}

impl NormalizedQuery {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        [
            ("with_genres", &self.with_genres),
            ("with_watch_providers", &self.with_watch_providers),
            ("with_original_language", &self.with_original_language),
            ("primary_release_year", &self.primary_release_year),
            ("certification_country", &self.certification_country),
            ("certification", &self.certification),
            ("vote_average.lte", &self.vote_average_lte),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|v| (key, v)))
        .collect()
    }

    pub fn is_unfiltered(&self) -> bool {
        self.pairs().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FilterResolver {
    policy: CertificationPolicy,
    certification_country: String,
}

impl Default for FilterResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CERTIFICATION_COUNTRY, CertificationPolicy::default())
    }
}

impl FilterResolver {
    pub fn new(certification_country: impl Into<String>, policy: CertificationPolicy) -> Self {
        Self {
            policy,
            certification_country: certification_country.into(),
        }
    }

    pub fn policy(&self) -> &CertificationPolicy {
        &self.policy
    }

    pub fn resolve(&self, selection: &FilterSelection) -> Result<NormalizedQuery, CatalogError> {
        for code in &selection.languages {
            check_token("language", code)?;
            if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(CatalogError::InvalidFilter(format!(
                    "language code {code:?} must be alphanumeric"
                )));
            }
        }
        for era in &selection.eras {
            if era.years.is_empty() {
                return Err(CatalogError::InvalidFilter(format!(
                    "era {} has no years",
                    era.label()
                )));
            }
        }

        let mut certifications = Vec::new();
        let mut vote_ceiling: Option<u8> = None;
        for token in &selection.scores {
            match token {
                ScoreToken::Certification(code) => {
                    check_token("certification", code)?;
                    if self.policy.allows(code) {
                        certifications.push(code.as_str());
                    }
                }
                ScoreToken::MaxVote(ceiling) => {
                    if *ceiling > MAX_VOTE_CEILING {
                        return Err(CatalogError::InvalidFilter(format!(
                            "vote ceiling {ceiling} exceeds {MAX_VOTE_CEILING}"
                        )));
                    }
                    vote_ceiling = Some(vote_ceiling.map_or(*ceiling, |c| c.max(*ceiling)));
                }
            }
        }

        let certification = join_non_empty(certifications, "|");
        let certification_country = certification
            .as_ref()
            .map(|_| self.certification_country.clone());

        Ok(NormalizedQuery {
            with_genres: join_non_empty(&selection.genres, ","),
            with_watch_providers: join_non_empty(&selection.providers, ","),
            with_original_language: join_non_empty(&selection.languages, ","),
            primary_release_year: join_non_empty(
                selection.eras.iter().flat_map(|e| e.years.iter()),
                ",",
            ),
            certification,
            certification_country,
            vote_average_lte: vote_ceiling.map(|c| c.to_string()),
        })
    }
}

fn check_token(dimension: &str, token: &str) -> Result<(), CatalogError> {
    if token.trim().is_empty() {
        return Err(CatalogError::InvalidFilter(format!(
            "empty {dimension} token"
        )));
    }
    if token
        .chars()
        .any(|c| c.is_control() || matches!(c, ',' | '|' | '&' | '=' | '#'))
    {
        return Err(CatalogError::InvalidFilter(format!(
            "{dimension} token {token:?} contains a reserved character"
        )));
    }
    Ok(())
}

fn join_non_empty<I>(items: I, separator: &str) -> Option<String>
where
    I: IntoIterator,
    I::Item: ToString,
{
    let joined = items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(separator);
    (!joined.is_empty()).then_some(joined)
}

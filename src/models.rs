use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";
const PLACEHOLDER: &str = "n/a";

pub type MovieId = i32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: MovieId,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: u32,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub credits: Option<Credits>,
    #[serde(default)]
    pub videos: Option<VideoList>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    pub provider_id: i32,
    pub provider_name: String,
    #[serde(default)]
    pub logo_path: Option<String>,
    #[serde(default)]
    pub display_priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Language {
    pub iso_639_1: String,
    pub english_name: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certification {
    pub certification: String,
    #[serde(default)]
    pub meaning: String,
    pub order: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub id: i32,
    #[serde(default)]
    pub character: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: i32,
    #[serde(default)]
    pub job: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoList {
    #[serde(default)]
    pub results: Vec<Video>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub site: String,
}

impl Video {
    pub fn youtube_url(&self) -> Option<String> {
        if self.site != "YouTube" {
            return None;
        }
        Some(format!("https://youtube.com/watch?v={}", self.key))
    }
}

/// One page of a paginated catalog listing. Results are stubs without
/// credits or videos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryPage {
    pub page: u32,
    #[serde(default)]
    pub results: Vec<Movie>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

impl Movie {
    pub fn poster_url(&self) -> Option<String> {
        self.poster_path.as_ref().map(|p| format!("{IMAGE_BASE}{p}"))
    }

    pub fn backdrop_url(&self) -> Option<String> {
        self.backdrop_path
            .as_ref()
            .map(|p| format!("{IMAGE_BASE}{p}"))
    }

    pub fn genre_text(&self) -> String {
        if self.genres.is_empty() {
            return PLACEHOLDER.to_string();
        }
        self.genres
            .iter()
            .map(|g| g.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn rating_text(&self) -> String {
        let percentage = (self.vote_average * 10.0).floor() as i64;
        format!("{percentage}%")
    }

    pub fn formatted_vote_count(&self) -> String {
        if self.vote_count >= 1000 {
            let thousands = f64::from(self.vote_count) / 1000.0;
            return format!("{thousands:.1}K votes");
        }
        format!("{} votes", self.vote_count)
    }

    pub fn year_text(&self) -> String {
        self.parsed_release_date()
            .map(|d| d.year().to_string())
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    }

    pub fn release_date_text(&self) -> String {
        self.parsed_release_date()
            .map(|d| d.format("%d %b, %Y").to_string())
            .unwrap_or_else(|| PLACEHOLDER.to_string())
    }

    pub fn duration_text(&self) -> String {
        match self.runtime {
            Some(minutes) if minutes > 0 => format!("{minutes} minutes"),
            _ => PLACEHOLDER.to_string(),
        }
    }

    pub fn cast(&self) -> &[CastMember] {
        self.credits
            .as_ref()
            .map(|c| c.cast.as_slice())
            .unwrap_or_default()
    }

    pub fn directors(&self) -> Vec<&CrewMember> {
        self.crew_with_job("director")
    }

    pub fn producers(&self) -> Vec<&CrewMember> {
        self.crew_with_job("producer")
    }

    pub fn screen_writers(&self) -> Vec<&CrewMember> {
        self.crew_with_job("story")
    }

    pub fn youtube_trailers(&self) -> Vec<&Video> {
        self.videos
            .as_ref()
            .map(|v| {
                v.results
                    .iter()
                    .filter(|video| video.youtube_url().is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn crew_with_job(&self, job: &str) -> Vec<&CrewMember> {
        self.credits
            .as_ref()
            .map(|c| {
                c.crew
                    .iter()
                    .filter(|member| member.job.eq_ignore_ascii_case(job))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parsed_release_date(&self) -> Option<NaiveDate> {
        let raw = self.release_date.as_deref()?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

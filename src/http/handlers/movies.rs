//! Versioned catalog records.
//!
//! Updates go through [`ConcurrencyGuard`]: the body carries the version the
//! client last read, and a stale version is a 409.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::http::error::{ApiError, JsonBody};
use crate::http::server::AppState;
use crate::http::validation::{unique, Validator};
use crate::observability::metrics;
use crate::store::movie::{runtime_format, Movie, MovieId, NewMovie};
use crate::store::{ConcurrencyGuard, StoreError};

const EARLIEST_YEAR: i32 = 1888;
const MAX_TITLE_BYTES: usize = 500;
const MAX_GENRES: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovieInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default, with = "runtime_format")]
    pub runtime: i32,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoviePatch {
    pub version: Option<i32>,
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "optional_runtime")]
    pub runtime: Option<i32>,
    pub genres: Option<Vec<String>>,
}

fn optional_runtime<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => runtime_format::parse(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("invalid runtime format")),
        None => Ok(None),
    }
}

fn check_title(v: &mut Validator, title: &str) {
    v.check(!title.trim().is_empty(), "title", "must be provided")
        .check(title.len() <= MAX_TITLE_BYTES, "title", "must not be more than 500 bytes long");
}

fn check_year(v: &mut Validator, year: i32) {
    v.check(year != 0, "year", "must be provided")
        .check(year >= EARLIEST_YEAR, "year", "must be greater than 1888")
        .check(year <= Utc::now().year(), "year", "must not be in the future");
}

fn check_runtime(v: &mut Validator, runtime: i32) {
    v.check(runtime > 0, "runtime", "must be a positive integer");
}

fn check_genres(v: &mut Validator, genres: &[String]) {
    v.check(!genres.is_empty(), "genres", "must contain at least 1 genre")
        .check(genres.len() <= MAX_GENRES, "genres", "must not contain more than 5 genres")
        .check(unique(genres), "genres", "must not contain duplicate values");
}

/// Path ids that do not parse as a positive integer name nothing.
fn parse_id(raw: &str) -> Result<MovieId, ApiError> {
    match raw.parse::<MovieId>() {
        Ok(id) if id >= 1 => Ok(id),
        _ => Err(ApiError::NotFound),
    }
}

/// `POST /v1/movies`
pub async fn create_movie(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<MovieInput>,
) -> Result<Response, ApiError> {
    let mut v = Validator::new();
    check_title(&mut v, &input.title);
    check_year(&mut v, input.year);
    check_runtime(&mut v, input.runtime);
    check_genres(&mut v, &input.genres);
    v.finish()?;

    let movie = state
        .backend
        .movies
        .insert_movie(NewMovie {
            title: input.title,
            year: input.year,
            runtime: input.runtime,
            genres: input.genres,
        })
        .await?;

    let location = format!("/v1/movies/{}", movie.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "movie": movie })),
    )
        .into_response())
}

/// `GET /v1/movies/{id}`
pub async fn show_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let movie = state.backend.movies.movie_by_id(parse_id(&id)?).await?;
    Ok(Json(json!({ "movie": movie })))
}

/// `PATCH /v1/movies/{id}`
pub async fn update_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<MoviePatch>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id)?;

    let mut v = Validator::new();
    v.check(patch.version.is_some(), "version", "must be provided");
    if let Some(title) = &patch.title {
        check_title(&mut v, title);
    }
    if let Some(year) = patch.year {
        check_year(&mut v, year);
    }
    if let Some(runtime) = patch.runtime {
        check_runtime(&mut v, runtime);
    }
    if let Some(genres) = &patch.genres {
        check_genres(&mut v, genres);
    }
    v.finish()?;
    let expected = patch.version.unwrap_or_default();

    let MoviePatch {
        title,
        year,
        runtime,
        genres,
        ..
    } = patch;
    let guard = ConcurrencyGuard::new(state.backend.movies.as_ref());
    let result = guard
        .apply(id, expected, move |movie: &mut Movie| {
            if let Some(title) = title {
                movie.title = title;
            }
            if let Some(year) = year {
                movie.year = year;
            }
            if let Some(runtime) = runtime {
                movie.runtime = runtime;
            }
            if let Some(genres) = genres {
                movie.genres = genres;
            }
        })
        .await;

    match result {
        Ok(movie) => Ok(Json(json!({ "movie": movie }))),
        Err(StoreError::EditConflict) => {
            metrics::record_edit_conflict();
            tracing::info!(movie_id = id, expected_version = expected, "Edit conflict");
            Err(ApiError::EditConflict)
        }
        Err(err) => Err(err.into()),
    }
}

/// `DELETE /v1/movies/{id}`
pub async fn delete_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.backend.movies.delete_movie(parse_id(&id)?).await?;
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

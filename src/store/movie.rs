//! Catalog record used by the resource handlers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::concurrency::Versioned;

pub type MovieId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movie {
    pub id: MovieId,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub year: i32,
    /// Minutes; rendered as `"<n> mins"`.
    #[serde(with = "runtime_format")]
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

#[derive(Debug, Clone)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
}

impl Versioned for Movie {
    type Id = MovieId;

    fn id(&self) -> MovieId {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Runtime travels as a `"<n> mins"` string on the wire.
pub mod runtime_format {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(minutes: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{minutes} mins"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom("invalid runtime format"))
    }

    pub fn parse(raw: &str) -> Option<i32> {
        match raw.split(' ').collect::<Vec<_>>().as_slice() {
            [minutes, "mins"] => minutes.parse().ok(),
            _ => None,
        }
    }
}

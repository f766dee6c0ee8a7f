use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("listing request failed: {0}")]
    Transport(String),
    #[error("station {id} has an unusable `{field}`: {reason}")]
    Mapping {
        id: String,
        field: &'static str,
        reason: String,
    },
    #[error("reverse geocoding failed: {0}")]
    Geocode(String),
    #[error("failed to write stations")]
    Storage(#[source] rusqlite::Error),
    #[error("geocoding cache at {} is unreadable", path.display())]
    CacheCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Config(String),
    #[error("{stage} stage failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub(crate) fn missing_field(id: impl ToString, field: &'static str) -> Self {
        AppError::Mapping {
            id: id.to_string(),
            field,
            reason: "missing".into(),
        }
    }

    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ AppError::Stage { .. } => already,
            other => AppError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            AppError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Startup,
    Extract,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Startup => "startup",
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Movie metadata lookup.

use crate::ledger::StoreFuture;
use crate::types::MovieId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the metadata catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog has no such movie
    #[error("Movie not found: {0}")]
    MovieNotFound(MovieId),

    /// The catalog could not be reached
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// What scheduling needs to know about a movie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieDetails {
    /// Display title
    pub title: String,
    /// Runtime in minutes, buffer excluded
    pub runtime_minutes: u32,
}

/// Source of movie titles and runtimes.
pub trait MovieCatalog: Send + Sync {
    /// Look up a movie.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the movie is unknown or the catalog is down.
    fn movie_details(&self, movie_id: MovieId) -> StoreFuture<'_, MovieDetails, CatalogError>;
}

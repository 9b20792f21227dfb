use std::path::PathBuf;
use std::sync::Arc;

use clue_core::{Clue, ClueError, ClueStore, Position};
use serde::{Deserialize, Serialize};

mod blob;

pub use blob::{
    base_name, extension, BlobNamer, BlobStore, BlobUpload, BlobWriter, MSG_MISSING_UPLOAD_FIELD,
    UPLOAD_FIELD,
};

pub const DEFAULT_AUTH_TOKEN: &str = "123456";

/// Raw `start`/`count` query parameters; empty values count as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListQuery {
    pub start: Option<String>,
    pub count: Option<String>,
}

impl ListQuery {
    fn parse_param(name: &str, raw: Option<&str>) -> Result<Option<usize>, ClueError> {
        let Some(raw) = raw.filter(|value| !value.is_empty()) else {
            return Ok(None);
        };
        raw.parse::<usize>()
            .map(Some)
            .map_err(|err| ClueError::invalid(format!("invalid {name} {raw:?}: {err}")))
    }
}

/// Request handlers over an injected [`ClueStore`].
#[derive(Debug, Clone)]
pub struct ClueApi {
    store: Arc<dyn ClueStore>,
    auth_token: Arc<str>,
    blobs: BlobStore,
}

impl ClueApi {
    #[must_use]
    pub fn new(
        store: Arc<dyn ClueStore>,
        auth_token: impl Into<String>,
        upload_dir: PathBuf,
    ) -> Self {
        let auth_token: String = auth_token.into();
        Self { store, auth_token: Arc::from(auth_token), blobs: BlobStore::new(upload_dir) }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ClueStore> {
        &self.store
    }

    /// Append one clue.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] when `title` or `number` is blank; the store is
    /// left untouched.
    pub fn create_clue(&self, clue: Clue) -> Result<Position, ClueError> {
        clue.validate()?;
        let position = self.store.append(clue);
        tracing::info!(%position, "clue created");
        Ok(position)
    }

    /// Clues `[start, start + count)`; `start` defaults to 0 and `count` to the store length.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] for unparseable parameters or a range past the
    /// end of the store.
    pub fn list_clues(&self, query: &ListQuery) -> Result<Vec<Clue>, ClueError> {
        let start = ListQuery::parse_param("start", query.start.as_deref())?.unwrap_or(0);
        let count = ListQuery::parse_param("count", query.count.as_deref())?;
        self.store.range(start, count)
    }

    /// Clue at the 1-based positional id `raw_id`.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] for a blank or malformed id and
    /// [`ClueError::NotFound`] when it exceeds the store length.
    pub fn clue_info(&self, raw_id: &str) -> Result<Clue, ClueError> {
        let position = self.resolve(raw_id)?;
        self.store.get(position)
    }

    /// Overwrite the clue [`ClueApi::clue_info`] would return for `raw_id`.
    ///
    /// # Errors
    /// Id errors as in [`ClueApi::clue_info`], then [`ClueError::InvalidInput`] when
    /// `title` or `number` is blank.
    pub fn update_clue(&self, raw_id: &str, clue: Clue) -> Result<(), ClueError> {
        let position = self.resolve(raw_id)?;
        clue.validate()?;
        self.store.replace(position, clue)?;
        tracing::info!(%position, "clue updated");
        Ok(())
    }

    /// Remove the clue at `raw_id`, shifting every later clue down one position.
    ///
    /// # Errors
    /// Returns [`ClueError::PermissionDenied`] unless `authorization` equals the configured
    /// token (checked before the id), then id errors as in [`ClueApi::clue_info`].
    pub fn delete_clue(&self, authorization: Option<&str>, raw_id: &str) -> Result<(), ClueError> {
        if !self.authorized(authorization) {
            tracing::warn!(id = raw_id, "delete rejected: bad authorization token");
            return Err(ClueError::PermissionDenied);
        }
        let position = self.resolve(raw_id)?;
        self.store.remove(position)?;
        tracing::info!(%position, remaining = self.store.len(), "clue deleted");
        Ok(())
    }

    /// Start an upload batch writing into the configured directory.
    #[must_use]
    pub fn begin_upload(&self) -> BlobUpload {
        self.blobs.begin()
    }

    fn resolve(&self, raw_id: &str) -> Result<Position, ClueError> {
        let position = Position::parse(raw_id)?;
        if position.get() > self.store.len() {
            return Err(ClueError::not_found());
        }
        Ok(position)
    }

    fn authorized(&self, provided: Option<&str>) -> bool {
        provided.is_some_and(|token| constant_time_eq(self.auth_token.as_bytes(), token.as_bytes()))
    }
}

fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.iter().zip(provided).fold(0_u8, |acc, (left, right)| acc | (left ^ right)) == 0
}

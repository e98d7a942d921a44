//! Shuffle playback over the whole catalog with a persisted, navigable history.
//!
//! Every `next` appends a history entry and moves the playback position to it; `previous`
//! walks the position back one entry at a time. The position lives in `app_state`, so it
//! survives restarts.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

use crate::db::{self, DynError, STATE_SHUFFLE_POSITION};
use crate::models::{Collection, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleScope {
    /// Any playable track
    #[default]
    Track,
    /// A track from a different collection than the current one
    Collection,
}

#[derive(Debug, Error)]
pub enum ShuffleError {
    #[error("no playback history")]
    NoHistory,
    #[error("no earlier entry in playback history")]
    NoEarlierEntry,
    #[error("history entry {0} refers to a missing track")]
    TrackMissing(i64),
    #[error("catalog store error: {0}")]
    Store(#[from] DynError),
}

impl From<sqlx::Error> for ShuffleError {
    fn from(e: sqlx::Error) -> Self {
        ShuffleError::Store(Box::new(e))
    }
}

/// What the player shows. All empty when the catalog has nothing playable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlayerState {
    pub track: Option<Track>,
    pub collection: Option<Collection>,
    pub category_name: String,
    pub history_position: Option<i64>,
    pub has_prev: bool,
}

#[derive(Clone)]
pub struct ShuffleEngine {
    pool: SqlitePool,
    recent_window: u32,
}

impl ShuffleEngine {
    pub fn new(pool: SqlitePool, recent_window: u32) -> Self {
        Self {
            pool,
            recent_window,
        }
    }

    /// Persisted playback position, if any
    pub async fn position(&self) -> Result<Option<i64>, ShuffleError> {
        let Some(value) = db::get_state(&self.pool, STATE_SHUFFLE_POSITION).await? else {
            return Ok(None);
        };
        match value.parse::<i64>() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                warn!("Ignoring malformed shuffle position '{}'", value);
                Ok(None)
            }
        }
    }

    /// Pick a random track, record it in history and make it current.
    ///
    /// Candidates are tried in tiers: in scope and not recently played, then in scope, then
    /// any playable track.
    pub async fn next(&self, scope: ShuffleScope) -> Result<PlayerState, ShuffleError> {
        let exclude_collection = match scope {
            ShuffleScope::Track => None,
            ShuffleScope::Collection => match self.position().await? {
                Some(position) => db::track_for_history_entry(&self.pool, position)
                    .await?
                    .map(|t| t.collection_id),
                None => None,
            },
        };

        let mut picked =
            db::random_track(&self.pool, exclude_collection, Some(self.recent_window)).await?;
        if picked.is_none() && exclude_collection.is_some() {
            debug!("Every out-of-collection track was played recently, allowing repeats");
            picked = db::random_track(&self.pool, exclude_collection, None).await?;
        }
        if picked.is_none() {
            picked = db::random_track(&self.pool, None, None).await?;
        }

        let Some(track) = picked else {
            return Ok(PlayerState::default());
        };

        let mut tx = self.pool.begin().await?;
        let history_id = db::append_history(&mut *tx, track.id, &Utc::now().to_rfc3339()).await?;
        db::set_state(&mut *tx, STATE_SHUFFLE_POSITION, &history_id.to_string()).await?;
        tx.commit().await?;

        debug!("Shuffle picked track {} (history {})", track.id, history_id);
        self.player_state(track, history_id).await
    }

    /// Move the playback position to the preceding history entry
    pub async fn previous(&self) -> Result<PlayerState, ShuffleError> {
        let position = self.position().await?.ok_or(ShuffleError::NoHistory)?;
        let previous = db::previous_history_id(&self.pool, position)
            .await?
            .ok_or(ShuffleError::NoEarlierEntry)?;

        db::set_state(&self.pool, STATE_SHUFFLE_POSITION, &previous.to_string()).await?;

        let track = db::track_for_history_entry(&self.pool, previous)
            .await?
            .ok_or(ShuffleError::TrackMissing(previous))?;
        self.player_state(track, previous).await
    }

    /// The track at the playback position, or a fresh pick if there is none
    pub async fn current(&self) -> Result<PlayerState, ShuffleError> {
        if let Some(position) = self.position().await? {
            if let Some(track) = db::track_for_history_entry(&self.pool, position).await? {
                return self.player_state(track, position).await;
            }
            warn!("Shuffle position {} has no history entry, picking a new track", position);
        }
        self.next(ShuffleScope::Track).await
    }

    async fn player_state(&self, track: Track, position: i64) -> Result<PlayerState, ShuffleError> {
        let collection = db::get_collection(&self.pool, track.collection_id).await?;
        let category_name = match &collection {
            Some(collection) => db::get_category_name(&self.pool, collection.category_id)
                .await?
                .unwrap_or_default(),
            None => String::new(),
        };
        let has_prev = db::previous_history_id(&self.pool, position).await?.is_some();

        Ok(PlayerState {
            track: Some(track),
            collection,
            category_name,
            history_position: Some(position),
            has_prev,
        })
    }
}

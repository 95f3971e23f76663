//! Redis-backed read-through cache for profile and match lookups.
//!
//! Entries expire after a fixed TTL and can be dropped explicitly with the
//! `invalidate_*` methods (e.g. after a user toggles incognito). Redis errors
//! never fail a lookup: the cache steps aside and the inner reader answers.
//! Misses are not cached, so a profile created after a lookup is seen on the
//! next sweep.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{MatchParticipants, ProfileMeta};

use crate::repository::{MatchReader, ProfileReader};

pub struct CachedDirectory<R> {
    inner: R,
    redis: ConnectionManager,
    ttl: Duration,
}

impl<R> CachedDirectory<R> {
    pub fn new(inner: R, redis: ConnectionManager, ttl: Duration) -> Self {
        Self { inner, redis, ttl }
    }

    fn profile_key(user_id: Uuid) -> String {
        format!("herald:profile:{user_id}")
    }

    fn match_key(match_id: &str) -> String {
        format!("herald:match:{match_id}")
    }

    pub async fn invalidate_profile(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        redis.del::<_, ()>(Self::profile_key(user_id)).await?;
        Ok(())
    }

    pub async fn invalidate_match(&self, match_id: &str) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        redis.del::<_, ()>(Self::match_key(match_id)).await?;
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut redis = self.redis.clone();
        match redis.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(key, error = %e, "Lookup cache read failed");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        let mut redis = self.redis.clone();
        let ttl_secs = self.ttl.as_secs().max(1);
        if let Err(e) = redis.set_ex::<_, _, ()>(key, raw, ttl_secs).await {
            tracing::debug!(key, error = %e, "Lookup cache write failed");
        }
    }
}

#[async_trait]
impl<R: ProfileReader> ProfileReader for CachedDirectory<R> {
    async fn profile_meta(&self, user_id: Uuid) -> Result<Option<ProfileMeta>, AppError> {
        let key = Self::profile_key(user_id);
        if let Some(hit) = self.read::<ProfileMeta>(&key).await {
            return Ok(Some(hit));
        }

        let profile = self.inner.profile_meta(user_id).await?;
        if let Some(profile) = &profile {
            self.write(&key, profile).await;
        }
        Ok(profile)
    }
}

#[async_trait]
impl<R: MatchReader> MatchReader for CachedDirectory<R> {
    async fn match_participants(
        &self,
        match_id: &str,
    ) -> Result<Option<MatchParticipants>, AppError> {
        let key = Self::match_key(match_id);
        if let Some(hit) = self.read::<MatchParticipants>(&key).await {
            return Ok(Some(hit));
        }

        let participants = self.inner.match_participants(match_id).await?;
        if let Some(participants) = &participants {
            self.write(&key, participants).await;
        }
        Ok(participants)
    }
}

//! Token registry: device token resolution, project filtering and batching.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::DeviceToken;

use crate::repository::TokenRepository;

/// Largest batch the Expo push API accepts.
pub const MAX_GATEWAY_BATCH: usize = 100;

pub struct TokenRegistry {
    repository: Arc<dyn TokenRepository>,
    allowed_project_ids: HashSet<String>,
    max_batch: usize,
}

impl TokenRegistry {
    pub fn new(
        repository: Arc<dyn TokenRepository>,
        allowed_project_ids: impl IntoIterator<Item = String>,
        max_batch: usize,
    ) -> Self {
        Self {
            repository,
            allowed_project_ids: allowed_project_ids.into_iter().collect(),
            max_batch: max_batch.clamp(1, MAX_GATEWAY_BATCH),
        }
    }

    /// Tokens registered for `user_id`, with repeated token strings collapsed.
    pub async fn resolve_tokens(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        let mut seen = HashSet::new();
        let tokens = self
            .repository
            .select_by_user(user_id)
            .await?
            .into_iter()
            .filter(|t| !t.token.trim().is_empty())
            .filter(|t| seen.insert(t.token.clone()))
            .collect();
        Ok(tokens)
    }

    /// Drop tokens issued for a project outside the allow-list and purge them
    /// from storage. Tokens without a project, or any token when the
    /// allow-list is empty, pass through.
    pub async fn filter_allowed(
        &self,
        tokens: Vec<DeviceToken>,
    ) -> Result<Vec<DeviceToken>, AppError> {
        if self.allowed_project_ids.is_empty() {
            return Ok(tokens);
        }

        let (allowed, rejected): (Vec<DeviceToken>, Vec<DeviceToken>) =
            tokens.into_iter().partition(|t| match &t.project_id {
                Some(project) => self.allowed_project_ids.contains(project),
                None => true,
            });

        if !rejected.is_empty() {
            let stale: Vec<String> = rejected.iter().map(|t| t.token.clone()).collect();
            let removed = self.repository.delete_by_tokens(&stale).await?;
            tracing::warn!(
                removed,
                projects = ?rejected.iter().filter_map(|t| t.project_id.as_deref()).collect::<Vec<_>>(),
                "Purged device tokens registered for a disallowed project"
            );
        }

        Ok(allowed)
    }

    /// Group tokens sharing a project into one batch; project-less tokens go
    /// out alone. Every batch is cut to the configured maximum size.
    pub fn partition_into_batches(&self, tokens: Vec<DeviceToken>) -> Vec<Vec<DeviceToken>> {
        let mut by_project: BTreeMap<String, Vec<DeviceToken>> = BTreeMap::new();
        let mut singletons = Vec::new();

        for token in tokens {
            match &token.project_id {
                Some(project) => by_project.entry(project.clone()).or_default().push(token),
                None => singletons.push(vec![token]),
            }
        }

        let mut batches: Vec<Vec<DeviceToken>> = Vec::new();
        for group in by_project.into_values() {
            batches.extend(group.chunks(self.max_batch).map(<[DeviceToken]>::to_vec));
        }
        batches.extend(singletons);
        batches
    }

    /// Remove tokens the provider reported as unregistered.
    pub async fn purge(&self, tokens: &[String]) -> Result<u64, AppError> {
        if tokens.is_empty() {
            return Ok(0);
        }
        let unique: Vec<String> = tokens
            .iter()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        self.repository.delete_by_tokens(&unique).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryTokens {
        tokens: Mutex<Vec<DeviceToken>>,
    }

    #[async_trait]
    impl TokenRepository for MemoryTokens {
        async fn select_by_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn delete_by_tokens(&self, tokens: &[String]) -> Result<u64, AppError> {
            let mut stored = self.tokens.lock().unwrap();
            let before = stored.len();
            stored.retain(|t| !tokens.contains(&t.token));
            Ok((before - stored.len()) as u64)
        }
    }

    fn token(user_id: Uuid, token: &str, project: Option<&str>) -> DeviceToken {
        DeviceToken {
            token: token.to_string(),
            user_id,
            project_id: project.map(str::to_string),
        }
    }

    fn registry(repo: Arc<MemoryTokens>, allowed: &[&str], max_batch: usize) -> TokenRegistry {
        TokenRegistry::new(repo, allowed.iter().map(|s| s.to_string()), max_batch)
    }

    #[tokio::test]
    async fn test_filter_allowed_purges_foreign_projects() {
        let user = Uuid::new_v4();
        let repo = Arc::new(MemoryTokens::default());
        repo.tokens.lock().unwrap().extend([
            token(user, "t1", Some("ours")),
            token(user, "t2", Some("theirs")),
            token(user, "t3", None),
        ]);
        let registry = registry(repo.clone(), &["ours"], 50);

        let tokens = registry.resolve_tokens(user).await.unwrap();
        let allowed = registry.filter_allowed(tokens).await.unwrap();

        let names: Vec<&str> = allowed.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(names, vec!["t1", "t3"]);
        let remaining: Vec<String> = repo
            .tokens
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.token.clone())
            .collect();
        assert_eq!(remaining, vec!["t1".to_string(), "t3".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_allow_list_keeps_everything() {
        let user = Uuid::new_v4();
        let repo = Arc::new(MemoryTokens::default());
        repo.tokens
            .lock()
            .unwrap()
            .push(token(user, "t1", Some("anything")));
        let registry = registry(repo.clone(), &[], 50);

        let tokens = registry.resolve_tokens(user).await.unwrap();
        assert_eq!(registry.filter_allowed(tokens).await.unwrap().len(), 1);
        assert_eq!(repo.tokens.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_collapses_duplicates() {
        let user = Uuid::new_v4();
        let repo = Arc::new(MemoryTokens::default());
        repo.tokens.lock().unwrap().extend([
            token(user, "t1", None),
            token(user, "t1", None),
            token(user, " ", None),
        ]);
        let registry = registry(repo, &[], 50);
        assert_eq!(registry.resolve_tokens(user).await.unwrap().len(), 1);
    }

    #[test]
    fn test_partition_groups_by_project_and_caps_size() {
        let user = Uuid::new_v4();
        let registry = registry(Arc::new(MemoryTokens::default()), &[], 2);
        let batches = registry.partition_into_batches(vec![
            token(user, "a1", Some("a")),
            token(user, "n1", None),
            token(user, "a2", Some("a")),
            token(user, "b1", Some("b")),
            token(user, "a3", Some("a")),
            token(user, "n2", None),
        ]);

        let shape: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.iter().map(|t| t.token.as_str()).collect())
            .collect();
        assert_eq!(
            shape,
            vec![
                vec!["a1", "a2"],
                vec!["a3"],
                vec!["b1"],
                vec!["n1"],
                vec!["n2"],
            ]
        );
    }
}

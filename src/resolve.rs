//! Relationship resolution for free-text reference fields.
//!
//! Two policies share one shape:
//!
//! - [`RelationshipResolver::resolve_creatable`] (outlets, beats): exact-name
//!   lookup, creating the entity when it does not exist.
//! - [`RelationshipResolver::resolve_validated`] (countries): case-insensitive
//!   lookup only. Misses are reported with "did you mean" suggestions and
//!   never fail the row.
//!
//! Creation is serialized per `(kind, name)` through [`KeyedLocks`], so two
//! in-flight batches naming the same new outlet create it exactly once.

use std::{collections::HashSet, sync::Arc};

use log::debug;
use similar::TextDiff;

use crate::{
    error::{RepositoryError, RepositoryResult},
    locks::KeyedLocks,
    model::{EntityId, EntityKind},
    repository::{NameMatch, Repository},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedRefs {
    pub valid_ids: Vec<EntityId>,
    pub invalid_names: Vec<String>,
    /// Existing names resembling the invalid ones, best match first.
    pub suggestions: Vec<String>,
}

impl ValidatedRefs {
    /// Human-readable warning for the unresolved names, if there are any.
    pub fn warning(&self, kind: EntityKind) -> Option<String> {
        if self.invalid_names.is_empty() {
            return None;
        }
        let mut message = format!(
            "Unknown {kind} name(s) ignored: {}",
            self.invalid_names.join(", ")
        );
        if !self.suggestions.is_empty() {
            message.push_str(&format!(" (did you mean: {}?)", self.suggestions.join(", ")));
        }
        Some(message)
    }
}

pub struct RelationshipResolver<R: Repository + ?Sized> {
    repo: Arc<R>,
    locks: Arc<KeyedLocks>,
    suggestion_limit: usize,
}

impl<R: Repository + ?Sized> RelationshipResolver<R> {
    pub fn new(repo: Arc<R>, locks: Arc<KeyedLocks>, suggestion_limit: usize) -> Self {
        Self {
            repo,
            locks,
            suggestion_limit,
        }
    }

    /// Resolves every name to an entity id, creating missing entities. Names
    /// are deduplicated by exact match; the result keeps first-seen order.
    pub async fn resolve_creatable(
        &self,
        kind: EntityKind,
        names: &[String],
    ) -> RepositoryResult<Vec<EntityId>> {
        if !kind.is_creatable() {
            return Err(RepositoryError::Immutable(kind));
        }
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !seen.insert(name) {
                continue;
            }
            ids.push(self.find_or_create(kind, name).await?);
        }
        Ok(ids)
    }

    async fn find_or_create(&self, kind: EntityKind, name: &str) -> RepositoryResult<EntityId> {
        if let Some(entity) = self.repo.find_entity(kind, name, NameMatch::Exact).await? {
            return Ok(entity.id);
        }
        let _guard = self.locks.lock(format!("{kind}:{name}")).await;
        // Another task may have created it while this one waited.
        if let Some(entity) = self.repo.find_entity(kind, name, NameMatch::Exact).await? {
            return Ok(entity.id);
        }
        match self.repo.create_entity(kind, name).await {
            Ok(entity) => {
                debug!("Created {kind} '{name}' (id {})", entity.id);
                Ok(entity.id)
            }
            // Created by a writer outside this process.
            Err(RepositoryError::UniqueViolation { .. }) => self
                .repo
                .find_entity(kind, name, NameMatch::Exact)
                .await?
                .map(|entity| entity.id)
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: kind.as_str(),
                    key: name.to_string(),
                }),
            Err(err) => Err(err),
        }
    }

    /// Looks every name up case-insensitively without creating anything.
    pub async fn resolve_validated(
        &self,
        kind: EntityKind,
        names: &[String],
    ) -> RepositoryResult<ValidatedRefs> {
        let mut refs = ValidatedRefs::default();
        let mut seen = HashSet::new();
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            if !seen.insert(name.to_lowercase()) {
                continue;
            }
            match self.repo.find_entity(kind, name, NameMatch::IgnoreCase).await? {
                Some(entity) => {
                    if !refs.valid_ids.contains(&entity.id) {
                        refs.valid_ids.push(entity.id);
                    }
                }
                None => refs.invalid_names.push(name.to_string()),
            }
        }

        for name in &refs.invalid_names.clone() {
            if refs.suggestions.len() >= self.suggestion_limit {
                break;
            }
            let candidates = self.suggest(kind, name).await?;
            for candidate in candidates {
                if refs.suggestions.len() >= self.suggestion_limit {
                    break;
                }
                if !refs.suggestions.contains(&candidate) {
                    refs.suggestions.push(candidate);
                }
            }
        }
        Ok(refs)
    }

    /// Substring matches for `name`, ranked by character-level similarity.
    async fn suggest(&self, kind: EntityKind, name: &str) -> RepositoryResult<Vec<String>> {
        if self.suggestion_limit == 0 {
            return Ok(Vec::new());
        }
        let mut candidates = self
            .repo
            .search_entities(kind, name, self.suggestion_limit)
            .await?;
        // A misspelled name rarely contains the stored one; retry per word.
        if candidates.is_empty() {
            for word in name.split_whitespace().filter(|w| w.chars().count() >= 3) {
                for entity in self
                    .repo
                    .search_entities(kind, word, self.suggestion_limit)
                    .await?
                {
                    if !candidates.iter().any(|c| c.id == entity.id) {
                        candidates.push(entity);
                    }
                }
            }
        }
        let wanted = name.to_lowercase();
        let mut ranked: Vec<(f32, String)> = candidates
            .into_iter()
            .map(|entity| {
                let score = TextDiff::from_chars(wanted.as_str(), entity.name.to_lowercase().as_str())
                    .ratio();
                (score, entity.name)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(ranked.into_iter().map(|(_, name)| name).collect())
    }
}

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binding::Replacements;
use crate::database::Database;
use crate::error::SqlConduitError;
use crate::executor::{QueryKind, QueryOptions};

/// Ordering used by bulk drop operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropOrder {
    /// Forward creation order. Referential-integrity violations are the
    /// engine's to report, not this layer's to hide.
    #[default]
    Creation,
    ReverseCreation,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Drop every registered entity first, then recreate.
    pub force: bool,
    /// Schema namespace hint, passed through to each entity.
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DropOptions {
    pub schema: Option<String>,
}

/// A table-like thing the manager can create and drop. Implementors declare
/// which other entities must exist first via `references`.
#[async_trait]
pub trait SchemaEntity: Send + Sync {
    fn name(&self) -> &str;

    /// Names of entities this one references. Unknown names and
    /// self-references carry no ordering weight.
    fn references(&self) -> Vec<String> {
        Vec::new()
    }

    async fn sync(&self, db: &Database, options: &SyncOptions) -> Result<(), SqlConduitError>;

    async fn drop_entity(&self, db: &Database, options: &DropOptions)
    -> Result<(), SqlConduitError>;
}

/// Ready-made entity backed by verbatim create/drop DDL.
#[derive(Debug, Clone)]
pub struct SqlEntity {
    name: String,
    references: Vec<String>,
    create_sql: String,
    drop_sql: String,
}

impl SqlEntity {
    pub fn new(
        name: impl Into<String>,
        create_sql: impl Into<String>,
        drop_sql: impl Into<String>,
    ) -> Self {
        SqlEntity {
            name: name.into(),
            references: Vec::new(),
            create_sql: create_sql.into(),
            drop_sql: drop_sql.into(),
        }
    }

    #[must_use]
    pub fn with_references<S: Into<String>>(mut self, refs: impl IntoIterator<Item = S>) -> Self {
        self.references = refs.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl SchemaEntity for SqlEntity {
    fn name(&self) -> &str {
        &self.name
    }

    fn references(&self) -> Vec<String> {
        self.references.clone()
    }

    async fn sync(&self, db: &Database, _options: &SyncOptions) -> Result<(), SqlConduitError> {
        db.query(
            &self.create_sql,
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Raw),
        )
        .await
        .map(|_| ())
    }

    async fn drop_entity(
        &self,
        db: &Database,
        _options: &DropOptions,
    ) -> Result<(), SqlConduitError> {
        db.query(
            &self.drop_sql,
            Replacements::None,
            QueryOptions::of_kind(QueryKind::Raw),
        )
        .await
        .map(|_| ())
    }
}

/// Registry of defined entities plus the dependency ordering for bulk
/// create/drop. Registration order is kept and breaks ordering ties.
pub struct EntityManager {
    entities: RwLock<Vec<Arc<dyn SchemaEntity>>>,
    drop_order: DropOrder,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("entities", &self.names())
            .field("drop_order", &self.drop_order)
            .finish()
    }
}

impl EntityManager {
    pub(crate) fn new(drop_order: DropOrder) -> Self {
        EntityManager {
            entities: RwLock::new(Vec::new()),
            drop_order,
        }
    }

    /// Register an entity. Redefining a name replaces the entity in place,
    /// keeping its original registration position.
    pub fn define(&self, entity: Arc<dyn SchemaEntity>) {
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entities.iter_mut().find(|e| e.name() == entity.name()) {
            *existing = entity;
        } else {
            entities.push(entity);
        }
    }

    pub fn entity(&self, name: &str) -> Option<Arc<dyn SchemaEntity>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn SchemaEntity>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entities in dependency order: every referenced entity precedes its
    /// referrer. Entities on a reference cycle are appended in registration
    /// order after the acyclic prefix.
    pub fn creation_order(&self) -> Vec<Arc<dyn SchemaEntity>> {
        let entities = self.snapshot();
        topo_order(&entities)
            .into_iter()
            .map(|i| Arc::clone(&entities[i]))
            .collect()
    }

    fn drop_sequence(&self) -> Vec<Arc<dyn SchemaEntity>> {
        let mut ordered = self.creation_order();
        if self.drop_order == DropOrder::ReverseCreation {
            ordered.reverse();
        }
        ordered
    }

    /// Create every registered entity, one at a time, in dependency order.
    /// Stops at the first failure and names the failing entity.
    pub(crate) async fn sync_all(
        &self,
        db: &Database,
        options: &SyncOptions,
    ) -> Result<(), SqlConduitError> {
        if options.force {
            self.drop_all(
                db,
                &DropOptions {
                    schema: options.schema.clone(),
                },
            )
            .await?;
        }
        for entity in self.creation_order() {
            debug!(entity = entity.name(), "syncing entity");
            entity
                .sync(db, options)
                .await
                .map_err(|source| SqlConduitError::SchemaSync {
                    entity: entity.name().to_string(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    /// Drop every registered entity sequentially in the configured order.
    pub(crate) async fn drop_all(
        &self,
        db: &Database,
        options: &DropOptions,
    ) -> Result<(), SqlConduitError> {
        for entity in self.drop_sequence() {
            debug!(entity = entity.name(), "dropping entity");
            entity
                .drop_entity(db, options)
                .await
                .map_err(|source| SqlConduitError::SchemaSync {
                    entity: entity.name().to_string(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

/// Kahn's algorithm over the reference graph. Ready entities are taken
/// smallest registration index first, so ties resolve to registration
/// order and the result is deterministic.
fn topo_order(entities: &[Arc<dyn SchemaEntity>]) -> Vec<usize> {
    let n = entities.len();
    let index_of: HashMap<&str, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name(), i))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (i, entity) in entities.iter().enumerate() {
        let mut seen = HashSet::new();
        for reference in entity.references() {
            let Some(&dep) = index_of.get(reference.as_str()) else {
                continue;
            };
            if dep == i || !seen.insert(dep) {
                continue;
            }
            dependents[dep].push(i);
            indegree[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        ordered.push(i);
        for &next in &dependents[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    // Anything not placed sits on (or behind) a cycle; append it rather
    // than reject, and let the engine report what it will.
    if ordered.len() < n {
        let placed: HashSet<usize> = ordered.iter().copied().collect();
        ordered.extend((0..n).filter(|i| !placed.contains(i)));
    }
    ordered
}

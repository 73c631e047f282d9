//! Registry of data access objects.
//!
//! DAOs are registered and looked up by their interface type:
//!
//! ```ignore
//! trait PlayerDao: Dao {
//!     fn player_name(&self, id: u32) -> Option<String>;
//! }
//!
//! manager.register::<dyn PlayerDao>(Arc::new(MySqlPlayerDao::new()))?;
//! let dao = manager.get::<dyn PlayerDao>()?;
//! ```

use std::any::{Any, TypeId, type_name};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("DAO for {0} is already registered")]
    AlreadyRegistered(String),

    #[error("no DAO registered for {0}")]
    NotFound(String),

    #[error("{dao} doesn't support {database} {major}.{minor}")]
    Unsupported {
        dao: String,
        database: String,
        major: u32,
        minor: u32,
    },
}

/// Base of every DAO interface.
pub trait Dao: Send + Sync + 'static {
    /// Implementation name used in logs.
    fn class_name(&self) -> &str;

    /// Whether this implementation works with the given database.
    fn supports(&self, database: &str, major: u32, minor: u32) -> bool;
}

/// Database the DAOs must support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

struct Entry {
    class_name: String,
    /// An `Arc<I>` for the interface `I` the entry is keyed by.
    dao: Box<dyn Any + Send + Sync>,
}

pub struct DaoManager {
    database: DatabaseInfo,
    daos: Mutex<FxHashMap<TypeId, Entry>>,
}

impl DaoManager {
    pub fn new(database: DatabaseInfo) -> Self {
        Self {
            database,
            daos: Mutex::default(),
        }
    }

    pub fn database(&self) -> &DatabaseInfo {
        &self.database
    }

    /// Register `dao` as the implementation of `I`.
    pub fn register<I: ?Sized + Dao>(&self, dao: Arc<I>) -> Result<(), DaoError> {
        let DatabaseInfo { name, major, minor } = &self.database;
        if !dao.supports(name, *major, *minor) {
            return Err(DaoError::Unsupported {
                dao: dao.class_name().to_string(),
                database: name.clone(),
                major: *major,
                minor: *minor,
            });
        }

        let mut daos = self.daos.lock().unwrap_or_else(|e| e.into_inner());
        if daos.contains_key(&TypeId::of::<I>()) {
            return Err(DaoError::AlreadyRegistered(type_name::<I>().to_string()));
        }
        tracing::debug!("Registered DAO {} for {}", dao.class_name(), type_name::<I>());
        daos.insert(
            TypeId::of::<I>(),
            Entry {
                class_name: dao.class_name().to_string(),
                dao: Box::new(dao),
            },
        );
        Ok(())
    }

    pub fn get<I: ?Sized + Dao>(&self) -> Result<Arc<I>, DaoError> {
        self.daos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<I>())
            .and_then(|entry| entry.dao.downcast_ref::<Arc<I>>())
            .cloned()
            .ok_or_else(|| DaoError::NotFound(type_name::<I>().to_string()))
    }

    /// Returns whether a DAO was registered for `I`.
    pub fn unregister<I: ?Sized + Dao>(&self) -> bool {
        self.daos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<I>())
            .is_some()
    }

    pub fn size(&self) -> usize {
        self.daos.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Implementation names, sorted.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .daos
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|e| e.class_name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn shutdown(&self) {
        let count = {
            let mut daos = self.daos.lock().unwrap_or_else(|e| e.into_inner());
            let count = daos.len();
            daos.clear();
            count
        };
        tracing::info!("DAO manager shut down, {} DAOs released", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait PlayerDao: Dao {
        fn name(&self, id: u32) -> String;
    }

    trait LegionDao: Dao {}

    struct MemoryPlayerDao;

    impl Dao for MemoryPlayerDao {
        fn class_name(&self) -> &str {
            "MemoryPlayerDao"
        }

        fn supports(&self, database: &str, major: u32, _minor: u32) -> bool {
            database == "memory" && major >= 1
        }
    }

    impl PlayerDao for MemoryPlayerDao {
        fn name(&self, id: u32) -> String {
            format!("player{}", id)
        }
    }

    fn manager(major: u32) -> DaoManager {
        DaoManager::new(DatabaseInfo {
            name: "memory".to_string(),
            major,
            minor: 0,
        })
    }

    #[test]
    fn test_register_and_get_by_interface() {
        let manager = manager(1);
        manager
            .register::<dyn PlayerDao>(Arc::new(MemoryPlayerDao))
            .unwrap();

        let dao = manager.get::<dyn PlayerDao>().unwrap();
        assert_eq!(dao.name(7), "player7");
        assert_eq!(manager.class_names(), vec!["MemoryPlayerDao"]);
        assert!(matches!(
            manager.get::<dyn LegionDao>(),
            Err(DaoError::NotFound(_))
        ));
    }

    #[test]
    fn test_double_registration() {
        let manager = manager(1);
        manager
            .register::<dyn PlayerDao>(Arc::new(MemoryPlayerDao))
            .unwrap();
        assert!(matches!(
            manager.register::<dyn PlayerDao>(Arc::new(MemoryPlayerDao)),
            Err(DaoError::AlreadyRegistered(_))
        ));
        assert!(manager.unregister::<dyn PlayerDao>());
        assert!(!manager.unregister::<dyn PlayerDao>());
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn test_unsupported_database() {
        let manager = manager(0);
        assert!(matches!(
            manager.register::<dyn PlayerDao>(Arc::new(MemoryPlayerDao)),
            Err(DaoError::Unsupported { major: 0, .. })
        ));
    }
}

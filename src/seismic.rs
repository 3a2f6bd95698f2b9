//! Seismic volumes in the survey database.

use std::path::PathBuf;

use anyhow::Result;

use crate::catalog::{Catalog, ObjectInfo, SurveyDatabase};

/// Translator group of seismic volumes.
pub const SEISMIC_GROUP: &str = "Seismic Data";

/// Seismic view of a [`Catalog`].
pub struct Seismic<'a, D: SurveyDatabase> {
    catalog: &'a mut Catalog<D>,
}

impl<'a, D: SurveyDatabase> Seismic<'a, D> {
    pub fn new(catalog: &'a mut Catalog<D>) -> Self {
        Self { catalog }
    }

    /// All seismic volumes, from the cache unless `reload` is set.
    pub fn list(&mut self, reload: bool) -> Result<&[ObjectInfo]> {
        self.catalog.list(SEISMIC_GROUP, reload)
    }

    /// Name of the volume with database key `key`.
    pub fn name(&self, key: &str) -> Result<Option<String>> {
        self.catalog.name_for_key(key)
    }

    /// Database key of the volume called `name`.
    pub fn db_key(&mut self, name: &str, reload: bool) -> Result<Option<String>> {
        Ok(self.list(reload)?.iter().find(|info| info.name == name).map(|info| info.id.clone()))
    }

    pub fn file_location(&mut self, name: &str) -> Result<Option<PathBuf>> {
        self.catalog.file_location(SEISMIC_GROUP, name)
    }

    /// True if the cached listing holds a volume called `name`.
    pub fn is_present(&mut self, name: &str) -> Result<bool> {
        Ok(self.list(false)?.iter().any(|info| info.name == name))
    }
}

//! Survey database catalog.
//!
//! Wells, seismic volumes and horizons are stored by the host's own database
//! library. [`SurveyDatabase`] is the interface that library binding
//! provides; [`Catalog`] layers an explicit, caller-owned cache of object
//! listings on top of it. Listings are refreshed only on request or after a
//! mutation made through the catalog.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One entry of the survey database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObjectInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Format", default)]
    pub format: Option<String>,
    #[serde(rename = "TranslatorGroup", default)]
    pub translator_group: Option<String>,
    #[serde(rename = "File name", default)]
    pub file_name: Option<PathBuf>,
}

impl ObjectInfo {
    /// Parse the JSON object list returned by the database binding.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>> {
        serde_json::from_str(json).context("failed to parse survey object list")
    }

    fn matches(&self, name_or_key: &str) -> bool {
        self.id == name_or_key || self.name == name_or_key
    }
}

/// Operations of the host's database binding.
pub trait SurveyDatabase {
    /// All objects of `translator_group`. With `all_translators`, objects of
    /// every translator in the group are included.
    fn object_infos(&self, translator_group: &str, all_translators: bool)
    -> Result<Vec<ObjectInfo>>;

    /// Register a new object and create its storage entry.
    fn create_object(
        &mut self,
        name: &str,
        translator_group: &str,
        translator: &str,
        overwrite: bool,
    ) -> Result<()>;

    fn remove_object(&mut self, name: &str, translator_group: &str) -> Result<()>;

    fn has_object(&self, name: &str, translator_group: &str) -> Result<bool>;

    /// Entry with database key `key`, whatever its group.
    fn object_info(&self, key: &str) -> Result<Option<ObjectInfo>>;
}

/// First entry of `list` whose key or name equals `name_or_key`.
pub fn find_by_name_or_key<'a>(list: &'a [ObjectInfo], name_or_key: &str) -> Option<&'a ObjectInfo> {
    list.iter().find(|info| info.matches(name_or_key))
}

/// Cached view of a [`SurveyDatabase`].
pub struct Catalog<D: SurveyDatabase> {
    db: D,
    lists: HashMap<String, Vec<ObjectInfo>>,
}

impl<D: SurveyDatabase> Catalog<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            lists: HashMap::new(),
        }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    /// Objects of `group`, fetched on first use or when `reload` is set.
    pub fn list(&mut self, group: &str, reload: bool) -> Result<&[ObjectInfo]> {
        if reload || !self.lists.contains_key(group) {
            let infos = self
                .db
                .object_infos(group, false)
                .with_context(|| format!("failed to list {group} objects"))?;
            debug!(group, count = infos.len(), "catalog listing refreshed");
            self.lists.insert(group.to_string(), infos);
        }
        Ok(self.lists.get(group).map(Vec::as_slice).unwrap_or_default())
    }

    /// Drop every cached listing.
    pub fn invalidate(&mut self) {
        self.lists.clear();
    }

    pub fn invalidate_group(&mut self, group: &str) {
        self.lists.remove(group);
    }

    pub fn find(&mut self, group: &str, name_or_key: &str) -> Result<Option<&ObjectInfo>> {
        Ok(find_by_name_or_key(self.list(group, false)?, name_or_key))
    }

    pub fn key_for_name(&mut self, group: &str, name: &str) -> Result<Option<String>> {
        Ok(self.find(group, name)?.map(|info| info.id.clone()))
    }

    /// Name of the entry with database key `key`, looked up directly in the
    /// database rather than in a cached listing.
    pub fn name_for_key(&self, key: &str) -> Result<Option<String>> {
        let info = self
            .db
            .object_info(key)
            .with_context(|| format!("failed to look up object {key}"))?;
        Ok(info.map(|info| info.name))
    }

    pub fn file_location(&mut self, group: &str, name_or_key: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .find(group, name_or_key)?
            .and_then(|info| info.file_name.clone()))
    }

    pub fn contains(&self, name: &str, group: &str) -> Result<bool> {
        self.db.has_object(name, group)
    }

    /// Register `name` and return the file the host expects it written to.
    pub fn new_entry_file(
        &mut self,
        name: &str,
        group: &str,
        translator: &str,
        overwrite: bool,
    ) -> Result<PathBuf> {
        self.db
            .create_object(name, group, translator, overwrite)
            .with_context(|| format!("failed to create {group} object {name}"))?;
        self.invalidate_group(group);

        match self.file_location(group, name)? {
            Some(path) => Ok(path),
            None => bail!("created {group} object {name} has no file name"),
        }
    }

    pub fn remove(&mut self, name: &str, group: &str) -> Result<()> {
        self.db
            .remove_object(name, group)
            .with_context(|| format!("failed to remove {group} object {name}"))?;
        self.invalidate_group(group);
        Ok(())
    }
}

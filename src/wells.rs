//! Wells, their logs, markers and tracks.
//!
//! Well data is read through the host's native well binding, modelled here as
//! [`WellStore`]. Names and database keys come from the survey [`Catalog`].

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ObjectInfo, SurveyDatabase};

/// Translator group of wells.
pub const WELL_GROUP: &str = "Well";

/// Default resampling step for [`Wells::logs`], in meters.
pub const DEFAULT_LOG_STEP: f64 = 0.5;

/// General information about one well.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WellInfo {
    pub name: String,
    #[serde(default)]
    pub uwid: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    /// Any further attributes reported by the binding.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// How log values are sampled along the borehole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogSampling {
    /// Stored samples, no resampling or unit conversion.
    Raw,
    /// Upscaled to a regular measured-depth step (meters).
    Resampled { zstep: f64 },
}

/// Logs sharing one measured-depth axis.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LogSet {
    #[serde(rename = "dah")]
    pub depths: Vec<f64>,
    #[serde(flatten)]
    pub curves: BTreeMap<String, Vec<f64>>,
}

/// One log with its measured depths.
#[derive(Debug, Clone, PartialEq)]
pub struct LogCurve {
    pub depths: Vec<f64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Marker {
    pub name: String,
    #[serde(rename = "dah")]
    pub md: f64,
    pub color: String,
}

/// One station of a well track.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TrackPoint {
    #[serde(rename = "dah")]
    pub md: f64,
    pub tvdss: f64,
    pub x: f64,
    pub y: f64,
}

/// Operations of the host's well binding.
pub trait WellStore {
    fn well_names(&self) -> Result<Vec<String>>;

    fn well_info(&self, well: &str) -> Result<WellInfo>;

    fn log_names(&self, well: &str) -> Result<Vec<String>>;

    fn read_logs(&self, well: &str, logs: &[String], sampling: LogSampling) -> Result<LogSet>;

    fn markers(&self, well: &str) -> Result<Vec<Marker>>;

    fn track(&self, well: &str) -> Result<Vec<TrackPoint>>;
}

/// Well access combining the binding with the survey catalog.
pub struct Wells<'a, S: WellStore, D: SurveyDatabase> {
    store: &'a S,
    catalog: &'a mut Catalog<D>,
}

impl<'a, S: WellStore, D: SurveyDatabase> Wells<'a, S, D> {
    pub fn new(store: &'a S, catalog: &'a mut Catalog<D>) -> Self {
        Self { store, catalog }
    }

    pub fn names(&self) -> Result<Vec<String>> {
        self.store.well_names().context("failed to list wells")
    }

    pub fn info(&self, well: &str) -> Result<WellInfo> {
        self.store
            .well_info(well)
            .with_context(|| format!("failed to read info of well {well}"))
    }

    /// Name of the well with database key `key`.
    pub fn name(&self, key: &str) -> Result<Option<String>> {
        self.catalog.name_for_key(key)
    }

    pub fn db_key(&mut self, well: &str) -> Result<Option<String>> {
        self.catalog.key_for_name(WELL_GROUP, well)
    }

    /// Database entries of all wells, from the cache unless `reload` is set.
    pub fn db_list(&mut self, reload: bool) -> Result<&[ObjectInfo]> {
        self.catalog.list(WELL_GROUP, reload)
    }

    pub fn log_names(&self, well: &str) -> Result<Vec<String>> {
        self.store
            .log_names(well)
            .with_context(|| format!("failed to list logs of well {well}"))
    }

    /// One log as stored, without resampling.
    pub fn log(&self, well: &str, log: &str) -> Result<LogCurve> {
        let mut set = self
            .store
            .read_logs(well, &[log.to_string()], LogSampling::Raw)
            .with_context(|| format!("failed to read log {log} of well {well}"))?;
        let Some(values) = set.curves.remove(log) else {
            bail!("well {well} returned no values for log {log}");
        };
        Ok(LogCurve {
            depths: set.depths,
            values,
        })
    }

    /// The logs at positions `indices` of [`Wells::log_names`], resampled to
    /// `zstep` meters.
    pub fn logs(&self, well: &str, indices: &[usize], zstep: f64) -> Result<LogSet> {
        if !(zstep.is_finite() && zstep > 0.0) {
            bail!("log resampling step must be positive, got {zstep}");
        }
        let names = self.log_names(well)?;
        let selected = indices
            .iter()
            .map(|&idx| match names.get(idx) {
                Some(name) => Ok(name.clone()),
                None => bail!("log index {idx} out of range; well {well} has {} logs", names.len()),
            })
            .collect::<Result<Vec<_>>>()?;
        self.store
            .read_logs(well, &selected, LogSampling::Resampled { zstep })
            .with_context(|| format!("failed to read logs of well {well}"))
    }

    pub fn markers(&self, well: &str) -> Result<Vec<Marker>> {
        self.store
            .markers(well)
            .with_context(|| format!("failed to read markers of well {well}"))
    }

    pub fn track(&self, well: &str) -> Result<Vec<TrackPoint>> {
        self.store
            .track(well)
            .with_context(|| format!("failed to read track of well {well}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::FakeDatabase;
    use std::cell::RefCell;

    struct FakeWells {
        logs: Vec<String>,
        requests: RefCell<Vec<(Vec<String>, LogSampling)>>,
    }

    impl FakeWells {
        fn new() -> Self {
            Self {
                logs: vec!["Gamma Ray".into(), "Density".into(), "Sonic".into()],
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl WellStore for FakeWells {
        fn well_names(&self) -> Result<Vec<String>> {
            Ok(vec!["F02-1".into(), "F03-4".into()])
        }

        fn well_info(&self, well: &str) -> Result<WellInfo> {
            let json = format!(
                r#"{{"name": "{well}", "uwid": "NL-F03-4", "status": "Oil", "x": 623255.9, "y": 6082586.6, "elevation": 30.0}}"#
            );
            Ok(serde_json::from_str(&json)?)
        }

        fn log_names(&self, well: &str) -> Result<Vec<String>> {
            if well == "missing" {
                bail!("no such well");
            }
            Ok(self.logs.clone())
        }

        fn read_logs(&self, _well: &str, logs: &[String], sampling: LogSampling) -> Result<LogSet> {
            self.requests.borrow_mut().push((logs.to_vec(), sampling));
            let step = match sampling {
                LogSampling::Raw => 0.15,
                LogSampling::Resampled { zstep } => zstep,
            };
            let depths: Vec<f64> = (0..4).map(|i| 100.0 + step * f64::from(i)).collect();
            let curves = logs
                .iter()
                .map(|name| (name.clone(), vec![name.len() as f64; depths.len()]))
                .collect();
            Ok(LogSet { depths, curves })
        }

        fn markers(&self, _well: &str) -> Result<Vec<Marker>> {
            Ok(serde_json::from_str(
                r##"[{"name": "Truncation", "dah": 512.5, "color": "#ff0000"},
                    {"name": "FS8", "dah": 740.0, "color": "#00ff00"}]"##,
            )?)
        }

        fn track(&self, _well: &str) -> Result<Vec<TrackPoint>> {
            Ok(vec![
                TrackPoint { md: 0.0, tvdss: -30.0, x: 623255.9, y: 6082586.6 },
                TrackPoint { md: 1000.0, tvdss: 970.0, x: 623256.0, y: 6082590.0 },
            ])
        }
    }

    #[test]
    fn names_and_info_come_from_the_binding() {
        let store = FakeWells::new();
        let mut catalog = Catalog::new(FakeDatabase::with_wells(&["F02-1", "F03-4"]));
        let wells = Wells::new(&store, &mut catalog);

        assert_eq!(wells.names().unwrap(), vec!["F02-1", "F03-4"]);
        let info = wells.info("F03-4").unwrap();
        assert_eq!(info.name, "F03-4");
        assert_eq!(info.status.as_deref(), Some("Oil"));
        assert_eq!(info.other["elevation"], 30.0);
    }

    #[test]
    fn keys_and_names_come_from_the_catalog() {
        let store = FakeWells::new();
        let mut catalog = Catalog::new(FakeDatabase::with_wells(&["F02-1", "F03-4"]));
        let mut wells = Wells::new(&store, &mut catalog);

        assert_eq!(wells.db_key("F03-4").unwrap().as_deref(), Some("100050.2"));
        assert_eq!(wells.name("100050.1").unwrap().as_deref(), Some("F02-1"));
        assert_eq!(wells.db_list(false).unwrap().len(), 2);
        wells.db_list(false).unwrap();
        assert_eq!(catalog.database().list_calls(), 1);
    }

    #[test]
    fn single_log_is_read_raw() {
        let store = FakeWells::new();
        let mut catalog = Catalog::new(FakeDatabase::default());
        let wells = Wells::new(&store, &mut catalog);

        let curve = wells.log("F03-4", "Sonic").unwrap();
        assert_eq!(curve.depths.len(), 4);
        assert_eq!(curve.values, vec![5.0; 4]);
        assert_eq!(store.requests.borrow()[0].1, LogSampling::Raw);
    }

    #[test]
    fn logs_are_selected_by_index_and_resampled() {
        let store = FakeWells::new();
        let mut catalog = Catalog::new(FakeDatabase::default());
        let wells = Wells::new(&store, &mut catalog);

        let set = wells.logs("F03-4", &[0, 2], DEFAULT_LOG_STEP).unwrap();
        assert_eq!(set.curves.keys().collect::<Vec<_>>(), vec!["Gamma Ray", "Sonic"]);
        assert_eq!(set.depths, vec![100.0, 100.5, 101.0, 101.5]);
        assert_eq!(
            store.requests.borrow()[0],
            (
                vec!["Gamma Ray".to_string(), "Sonic".to_string()],
                LogSampling::Resampled { zstep: 0.5 }
            )
        );
    }

    #[test]
    fn bad_log_requests_are_rejected() {
        let store = FakeWells::new();
        let mut catalog = Catalog::new(FakeDatabase::default());
        let wells = Wells::new(&store, &mut catalog);

        let err = wells.logs("F03-4", &[1, 7], 0.5).unwrap_err();
        assert!(err.to_string().contains("log index 7 out of range"));
        assert!(wells.logs("F03-4", &[0], 0.0).is_err());
        assert!(wells.logs("missing", &[0], 0.5).is_err());
        assert!(store.requests.borrow().is_empty());
    }

    #[test]
    fn markers_and_track() {
        let store = FakeWells::new();
        let mut catalog = Catalog::new(FakeDatabase::default());
        let wells = Wells::new(&store, &mut catalog);

        let markers = wells.markers("F03-4").unwrap();
        assert_eq!(markers[0].name, "Truncation");
        assert_eq!(markers[1].md, 740.0);
        let track = wells.track("F03-4").unwrap();
        assert_eq!(track.len(), 2);
        assert_eq!(track[1].tvdss, 970.0);
    }
}

//! Client-side access to an OpendTect installation: batch-job log
//! monitoring, installation and settings discovery, process launching, a
//! cached view of the survey database, and well, seismic and horizon access.

pub mod catalog;
pub mod config;
pub mod horizon;
pub mod host;
pub mod install;
pub mod launcher;
pub mod log;
pub mod monitor;
pub mod seismic;
pub mod settings;
pub mod tail;
pub mod wells;

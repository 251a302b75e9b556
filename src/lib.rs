//! Filefinder Library
//!
//! Indexing and synchronization engine for a desktop file finder: walks
//! configured roots, reconciles them into a `SQLite` index with minimal
//! writes, and serves filtered, sorted windows of the result.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod view;
pub mod walker;

pub use config::Config;
pub use error::{Error, Result};

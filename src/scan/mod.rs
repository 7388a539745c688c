//! Memory scanning subsystem (spec.md §4.2–§4.4).

pub mod comparator;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod store;

pub use config::{Endianness, ScanConfiguration, ScanMode, ScanRegion, ScanResultEntry, ValueType};
pub use controller::ScanController;

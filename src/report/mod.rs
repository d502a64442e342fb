//! Output generation.
//!
//! This module writes processed tables, per-farm risk charts and the
//! run summary.

pub mod chart;
pub mod generator;
pub mod writer;

pub use chart::render_division;
pub use generator::write_summary;
pub use writer::save_farm_days;

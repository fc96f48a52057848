//! Workbench subsystems.

pub mod certificate;
pub mod employees;
pub mod publication;
pub mod registry;
pub mod stages;
pub mod units;
pub mod workbench;

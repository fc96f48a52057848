//! Core modules for the workbench's storage layer and shared primitives.
//!
//! Everything a subsystem needs to persist state, report errors and read its
//! configuration lives here.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod model;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;

//! Reelgrab library — profile media harvester.
//!
//! This library crate exposes the acquisition pipeline modules for
//! integration testing: discovery (structured data, traffic harvest, DOM
//! fallback), stream probing and merging, and the download layer.

pub mod browser;
pub mod cancel;
pub mod capture;
pub mod cli;
pub mod dom;
pub mod download;
pub mod error;
pub mod harvest;
pub mod model;
pub mod mux;
pub mod orchestrator;
pub mod prescan;
pub mod probe;
pub mod resolver;

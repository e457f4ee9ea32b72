// src/lib.rs

//! Harvest: polite HTML extraction with robots.txt compliance and
//! append-only snapshot history.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod services;
pub mod storage;
pub mod utils;

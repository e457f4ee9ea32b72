//! Network-facing services.
//!
//! - `Pacer`: per-origin gates with randomized delays
//! - `Fetcher`: paced, retrying HTTP GET
//! - `PolicyResolver`: robots.txt cache and evaluation

mod fetcher;
mod pacing;
pub mod robots;

pub use fetcher::{FetchResponse, Fetcher};
pub use pacing::{OriginPermit, Pacer};
pub use robots::{PolicyDocument, PolicyResolver, PolicyRule, RuleKind, evaluate_rules, parse_policy};

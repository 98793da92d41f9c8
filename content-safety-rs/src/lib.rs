//! Content safety checks for generated suggestions.
//!
//! [`SafetyRater::rate`] maps text to a [`SafetyAssessment`]: a 0-10 rating
//! plus the list of concerns that lowered it.

pub mod filters;
pub mod rating;

pub use filters::{ContentCategory, ContentFilter, FilterError};
pub use rating::{SafetyAssessment, SafetyRater, MAX_RATING};

pub mod accumulator;
pub mod aggregation;
pub mod frequency;
pub mod meters;
pub mod query;
pub mod requests;
pub mod schedule;
pub mod units;
pub mod variables;

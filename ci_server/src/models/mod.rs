//! Diesel row types and their conversions into pipeline records.

pub mod definition;
pub mod execution;
pub mod variable;

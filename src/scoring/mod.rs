// Scoring — tier classification and alert thresholds.
//
// Everything here is pure: inputs in, scores out. No network or database
// access, so the pipeline can call it freely and tests need no fixtures.

pub mod alerts;
pub mod tier;

// logsift/src/lib.rs
//
// logsift: access-log normalisation with two online analysers:
// temporal clustering of request bursts and statistical bot detection.
//
//   services/  → parse service log lines into InputRecords
//   analysis/  → preprocess records against a shared buffer
//   engine/    → per-service pipeline: preprocess → transform → sink
//   state/     → record buffer, reservoir, state snapshots

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod record;
pub mod services;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

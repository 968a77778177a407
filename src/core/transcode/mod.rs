// src/core/transcode/mod.rs

//! Invokes the external transcoder binary to turn a resolved PDB into a
//! symcache artifact, publishing the result atomically.

mod orchestrator;

pub use orchestrator::{TranscodeOutcome, Transcoder};

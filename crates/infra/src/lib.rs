//! Platform integration for the Tandem mixing engine
//!
//! Binds the core render graph to real audio output via CPAL and hosts the
//! spectrum analysis taps consumed by visualization frontends.

pub mod audio;

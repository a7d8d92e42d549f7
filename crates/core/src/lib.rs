//! Core domain layer for the Tandem two-deck mixing engine
//!
//! Everything in this crate is platform-agnostic. Device access and the
//! real-time output stream live in `tandem-infra`.

pub mod domain;

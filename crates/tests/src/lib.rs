//! Integration tests for the Tandem mixing engine

#[cfg(test)]
mod mix_integration;

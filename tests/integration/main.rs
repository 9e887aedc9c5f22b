//! Integration tests for the testrollup binary and the reporting pipeline.

mod cli;
mod pipeline;

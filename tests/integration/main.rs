//! Integration tests for Sumi-Dispatch

mod common;
mod crawl_tests;
mod scheduler_tests;

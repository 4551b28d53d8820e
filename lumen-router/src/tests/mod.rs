//! Cross-module test suites for the navigation pipeline.

mod harness;

mod guard_tests;
mod history_tests;
mod navigation_tests;
mod redirect_tests;

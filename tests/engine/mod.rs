//! Engine Scenario Tests
//!
//! Full flows over the in-memory backend and the real gateway dispatcher.

mod catch_up_tests;
mod direct_tests;
mod group_tests;
mod presence_tests;

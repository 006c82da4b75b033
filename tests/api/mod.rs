//! REST API Tests

mod health_tests;
mod message_tests;

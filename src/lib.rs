//! MyPath API: goal tracking service
//!
//! Users organize long-term visions into goals and goals into tasks, log in
//! with email/password for bearer tokens, and can ask an AI provider to break
//! a goal down into tasks.
//!
//! Storage is Sled; every vision/goal/task is addressed through its parent id.

pub mod ai;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
// REST API module: Axum handlers, auth middleware and OpenAPI doc
pub mod rest;
// Parent-scoped record trees shared by visions, goals and tasks
pub mod scope;
pub mod storage;

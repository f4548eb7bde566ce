//! supercoin - a local hub for AI provider credentials and model routing.
//!
//! This library exposes the core modules for testing and reuse.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;

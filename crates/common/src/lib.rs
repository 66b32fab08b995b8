//! Common types shared across Together Classroom components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

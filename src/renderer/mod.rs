//! Renderer layer - the external label rendering service
//!
//! This module provides:
//! - Renderer trait for the external call
//! - RenderError with transient/permanent classification
//! - LabelaryRenderer HTTP implementation
//! - MockRenderer for tests and dry runs

pub mod client;
pub mod labelary;

pub use client::{MockCall, MockRenderer, MockResponse, RenderError, RenderOutput, Renderer};
pub use labelary::LabelaryRenderer;

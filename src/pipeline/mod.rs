//! Pipeline stages for a single capture.
//!
//! Each submodule implements exactly one step of
//! [`crate::capture::CaptureOrchestrator`], so each can be tested alone and
//! the rasterization backend can change without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! verify ──▶ geometry ──▶ render ──▶ encode ──▶ (thumbnail)
//! (content)  (size lock)  (clone,    (format,    (history)
//!                          fallback)  downscale)
//! ```
//!
//! 1. [`verify`]    compare displayed and expected text, repair once
//! 2. [`geometry`]  pin width/height; the guard restores style on drop
//! 3. [`render`]    sanitised clone, bounded rasterization, empty-canvas retry
//! 4. [`encode`]    PNG/JPEG/WebP bytes and data URLs, downscale on size errors
//! 5. [`thumbnail`] small JPEG preview stored with each history entry

pub mod encode;
pub mod geometry;
pub mod render;
pub mod thumbnail;
pub mod verify;

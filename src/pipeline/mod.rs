//! Pipeline stages for PDF object detection.
//!
//! Each submodule owns one transformation step, so every stage can be
//! tested with synthetic images and no pdfium library.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ page ─┬─ pass 1: full raster ───────────────┐
//! (path/URL) (pdfium)        └─ pass 2: preprocess ─▶ corner ──────┤
//!                                                                  ▼
//!                    assemble ◀── annotate ◀── merge ◀── passes (state machine)
//! ```
//!
//! 1. [`input`]      resolve a path or URL to validated PDF bytes
//! 2. [`render`]     rasterise every page inside `spawn_blocking`
//! 3. [`preprocess`] optional contrast / denoise / binarise view
//! 4. [`corner`]     bottom-right crop for the small-QR pass
//! 5. [`passes`]     per-page two-pass policy as explicit states
//! 6. [`merge`]      map pass coordinates to page points, suppress duplicates
//! 7. [`annotate`]   draw class-coloured boxes and labels
//! 8. [`assemble`]   write annotated pages into a new PDF
//!
//! [`page`] drives one page through steps 3–7.

pub mod annotate;
pub mod assemble;
pub mod corner;
pub mod input;
pub mod merge;
pub mod page;
pub mod passes;
pub mod preprocess;
pub mod render;

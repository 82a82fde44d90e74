//! Pipeline stages for a license scan.
//!
//! Each submodule implements exactly one transformation step. The stages are
//! pure or blocking functions with no shared state; sequencing, retries and
//! cancellation all live in [`crate::controller`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ orientation ──▶ normalize ──▶ encode ──▶ decode ──▶ aamva
//! (bytes)    (EXIF 1–8)     (turn+stretch) (JPEG)    (PDF417)   (fields)
//! ```
//!
//! 1. [`input`]       — wrap bytes + MIME type, enforce JPEG/PNG and size limits
//! 2. [`orientation`] — read the EXIF orientation tag; missing means `1`
//! 3. [`normalize`]   — turn the image upright and stretch it onto the target
//!    canvas; runs in `spawn_blocking`
//! 4. [`encode`]      — re-encode the canvas so it can be decoded or shown
//! 5. [`decode`]      — find and read one PDF417 symbol (rxing)
//! 6. [`aamva`]       — split the payload into tagged lines and map known tags
//!
//! The direct decode skips steps 2–4 and reads the original bytes as-is.

pub mod aamva;
pub mod decode;
pub mod encode;
pub mod input;
pub mod normalize;
pub mod orientation;

//! # Video Module
//!
//! Builds the optional picture track. [`VideoComposer`] lays out a
//! [`VideoPlan`] of black, caption and still segments for the configured
//! mode and turns it into segment, concat and mux render requests.
//! [`still`] letterboxes source images to the output resolution before they
//! are encoded.

pub mod composer;
pub mod still;

pub use composer::{PlannedSegment, SegmentKind, VideoComposer, VideoJob, VideoPlan};
pub use still::{is_image_file, letterbox, prepare_still, prepare_stills};

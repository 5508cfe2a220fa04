//! Core types and utilities for answer-sheet reading.
//!
//! This crate is intentionally small: pixel storage, bilinear sampling,
//! projective geometry and thresholding. It knows nothing about sheet
//! layouts or image containers.

mod homography;
mod image;
mod logger;
mod threshold;

pub use homography::{homography_from_4pt, Homography};
pub use image::{sample_bilinear, sample_bilinear_checked, GrayImageView, ImageError, PixelBuffer};
pub use threshold::{
    histogram, otsu_threshold_from_histogram, otsu_threshold_from_samples, Photometry,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LEVEL_ENV};

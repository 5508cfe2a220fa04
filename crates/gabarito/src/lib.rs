//! Read answer sheets ("gabaritos") from scanned or photographed images.
//!
//! One call turns an image into a [`Reading`]: the exam id (`id_prova`), the
//! participant id (`id_participante`) and one character per question
//! (`leitura`), or a stable error code.
//!
//! ## Quickstart
//!
//! ```no_run
//! let reading = gabarito::read_image_path("scan.png");
//! let record = reading.to_record();
//! println!("erro={} prova={} leitura={:?}", record.erro, record.id_prova, record.leitura);
//! ```
//!
//! Custom layouts go through a [`Reader`]:
//!
//! ```no_run
//! use gabarito::{Reader, sheet::SheetTemplate};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let template = SheetTemplate::load_json("layout.json")?;
//! let reader = Reader::new(template)?;
//! let bytes = std::fs::read("scan.jpg")?;
//! let reading = reader.read_bytes("jpg", &bytes);
//! # let _ = reading;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `gabarito::core`: pixel buffers, sampling, homography, thresholds, logger.
//! - `gabarito::sheet`: templates, sheet location, bubble sampling, decoding.
//! - [`load`]: image containers to grayscale.
//! - [`read`]: composition and entry points.
//! - [`score`]: grading a reading against an answer key.

pub use gabarito_core as core;
pub use gabarito_sheet as sheet;

pub mod load;
pub mod read;
pub mod reading;
pub mod score;

pub use load::{ImageSource, LoadError, LoadParams};
pub use read::{
    compose, decode_sheet, read_image_data, read_image_path, read_view, DecodedSheet, ReadError,
    Reader,
};
pub use reading::{ErrorKind, Reading, ReadingRecord, UNKNOWN_ID};
pub use score::{score_answers, Score, LEGACY_BLANK};

pub use gabarito_sheet::SheetTemplate;

/// Route `log` records and stage spans to a `tracing` subscriber.
///
/// Safe to call more than once; returns `false` when a subscriber was
/// already installed.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) -> bool {
    let installed = gabarito_core::init_tracing(json);
    // No-op when the subscriber already bridged `log`.
    let _ = tracing_log::LogTracer::init();
    installed
}

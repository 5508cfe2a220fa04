//! Result Composer and the read entry points.

use crate::load::{load, ImageSource, LoadError, LoadParams};
use crate::reading::{ErrorKind, Reading, UNKNOWN_ID};
use gabarito_core::GrayImageView;
use gabarito_sheet::{
    decode_fields, locate, sample, DecodedFields, FieldId, FieldScores, LocateError, SheetTemplate,
    TemplateError,
};
use log::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Decoded fields of a sheet that passed every geometric check.
pub type DecodedSheet = DecodedFields;

/// Errors that end a read before any field is reported.
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error("field `{field}` has {unreadable} of {cells} cells outside the image")]
    TooManyUnreadable {
        field: FieldId,
        unreadable: usize,
        cells: usize,
    },
    #[error("internal reader failure: {0}")]
    Internal(String),
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::Load(e) => e.kind(),
            ReadError::Locate(e) if e.is_detection_failure() => ErrorKind::SheetNotDetected,
            ReadError::Locate(_) | ReadError::TooManyUnreadable { .. } => {
                ErrorKind::SheetDistorted
            }
            ReadError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Reject sheets with too much of any field off-image, then decode.
pub fn decode_sheet(
    scores: &FieldScores,
    template: &SheetTemplate,
) -> Result<DecodedSheet, ReadError> {
    for field in template.field_ids() {
        let cells = scores.field(field);
        let unreadable = cells.iter().filter(|c| c.is_unreadable()).count();
        if unreadable == 0 {
            continue;
        }
        let frac = unreadable as f32 / cells.len().max(1) as f32;
        if frac > template.max_unreadable_frac {
            return Err(ReadError::TooManyUnreadable {
                field,
                unreadable,
                cells: cells.len(),
            });
        }
        debug!("{field}: {unreadable}/{} cells unreadable", cells.len());
    }
    Ok(decode_fields(scores, template))
}

/// Flatten a pipeline outcome into a [`Reading`].
pub fn compose(outcome: Result<DecodedSheet, ReadError>) -> Reading {
    match outcome {
        Ok(sheet) => {
            if let Err(why) = &sheet.exam_id {
                warn!("id_prova is ambiguous: {why}");
            }
            if let Err(why) = &sheet.participant_id {
                warn!("id_participante is ambiguous: {why}");
            }
            Reading::Success {
                id_prova: sheet.exam_id.unwrap_or(UNKNOWN_ID),
                id_participante: sheet.participant_id.unwrap_or(UNKNOWN_ID),
                leitura: sheet.answers,
            }
        }
        Err(err) => {
            warn!("read failed ({}): {err}", err.kind().code());
            Reading::failure(err.kind())
        }
    }
}

/// Run locate, sample and decode on an already loaded image.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(image, template), fields(width = image.width, height = image.height))
)]
pub fn read_view(
    image: &GrayImageView<'_>,
    template: &SheetTemplate,
) -> Result<DecodedSheet, ReadError> {
    let transform = locate(image, template)?;
    let scores = sample(image, &transform, template);
    decode_sheet(&scores, template)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sheet reader bound to one template.
///
/// Cheap to clone; the template is shared. Reads never unwind: a panic in
/// any stage becomes [`ErrorKind::Internal`].
#[derive(Clone, Debug)]
pub struct Reader {
    template: Arc<SheetTemplate>,
    load: LoadParams,
}

impl Reader {
    /// Reader for a custom template.
    pub fn new(template: SheetTemplate) -> Result<Self, TemplateError> {
        Self::from_shared(Arc::new(template))
    }

    pub fn from_shared(template: Arc<SheetTemplate>) -> Result<Self, TemplateError> {
        template.validate()?;
        Ok(Self {
            template,
            load: LoadParams::default(),
        })
    }

    /// Reader for [`SheetTemplate::standard`].
    pub fn standard() -> Self {
        Self {
            template: Arc::clone(builtin_template()),
            load: LoadParams::default(),
        }
    }

    pub fn with_load_params(mut self, load: LoadParams) -> Self {
        self.load = load;
        self
    }

    pub fn template(&self) -> &SheetTemplate {
        &self.template
    }

    pub fn load_params(&self) -> &LoadParams {
        &self.load
    }

    /// Full pipeline with the error kept.
    pub fn try_read(&self, source: ImageSource<'_>) -> Result<DecodedSheet, ReadError> {
        let image = load(source, &self.load)?;
        debug!("loaded {}x{} image", image.width(), image.height());
        read_view(&image.view(), &self.template)
    }

    fn guarded(&self, run: impl FnOnce() -> Result<DecodedSheet, ReadError>) -> Reading {
        let outcome = catch_unwind(AssertUnwindSafe(run)).unwrap_or_else(|payload| {
            let msg = panic_message(payload.as_ref());
            error!("reader panicked: {msg}");
            Err(ReadError::Internal(msg))
        });
        compose(outcome)
    }

    pub fn read(&self, source: ImageSource<'_>) -> Reading {
        self.guarded(|| self.try_read(source))
    }

    pub fn read_path(&self, path: impl AsRef<Path>) -> Reading {
        let path = path.as_ref();
        self.read(ImageSource::Path(path))
    }

    pub fn read_bytes(&self, format_hint: &str, bytes: &[u8]) -> Reading {
        self.read(ImageSource::Bytes { format_hint, bytes })
    }

    /// Read an image that is already grayscale.
    pub fn read_image(&self, image: &GrayImageView<'_>) -> Reading {
        self.guarded(|| read_view(image, &self.template))
    }
}

fn builtin_template() -> &'static Arc<SheetTemplate> {
    static TEMPLATE: OnceLock<Arc<SheetTemplate>> = OnceLock::new();
    TEMPLATE.get_or_init(|| Arc::new(SheetTemplate::standard()))
}

/// Read a sheet image file with the built-in template.
pub fn read_image_path(path: impl AsRef<Path>) -> Reading {
    Reader::standard().read_path(path)
}

/// Read an in-memory sheet image with the built-in template.
pub fn read_image_data(format_hint: &str, bytes: &[u8]) -> Reading {
    Reader::standard().read_bytes(format_hint, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gabarito_sheet::{AmbiguousMark, CellScore};

    fn blank_scores(template: &SheetTemplate) -> FieldScores {
        let numeric = |cols: usize| vec![vec![CellScore::Fill(0.0); 10]; cols];
        FieldScores {
            exam_id: numeric(template.exam_id.ncols()),
            participant_id: numeric(template.participant_id.ncols()),
            answers: vec![vec![CellScore::Fill(0.0); 5]; template.answer_row_count()],
        }
    }

    #[test]
    fn kinds_follow_stage() {
        assert_eq!(
            ReadError::from(LocateError::NotEnoughFiducials { found: 2 }).kind(),
            ErrorKind::SheetNotDetected
        );
        assert_eq!(
            ReadError::from(LocateError::OrientationNotFound { marked: 2 }).kind(),
            ErrorKind::SheetNotDetected
        );
        assert_eq!(
            ReadError::from(LocateError::NotConvex).kind(),
            ErrorKind::SheetDistorted
        );
        assert_eq!(
            ReadError::from(LoadError::Empty).kind(),
            ErrorKind::SourceUnavailable
        );
        assert_eq!(
            ReadError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn blank_sheet_composes_to_placeholders() {
        let template = SheetTemplate::standard();
        let scores = blank_scores(&template);
        let sheet = decode_sheet(&scores, &template).expect("decodes");
        assert_eq!(sheet.exam_id, Err(AmbiguousMark::Blank { column: 0 }));

        let reading = compose(Ok(sheet));
        assert_eq!(reading.code(), 0);
        assert_eq!(reading.id_prova(), UNKNOWN_ID);
        assert_eq!(reading.leitura(), Some("-".repeat(20).as_str()));
    }

    #[test]
    fn unreadable_fraction_gates_the_sheet() {
        let template = SheetTemplate::standard();

        // One unreadable option of five: 20 % is tolerated, the row reads '?'.
        let mut scores = blank_scores(&template);
        scores.answers[4][1] = CellScore::Unreadable;
        let sheet = decode_sheet(&scores, &template).expect("tolerated");
        assert_eq!(sheet.answers.chars().nth(4), Some('?'));

        // Two of five: 40 % rejects the whole sheet.
        scores.answers[4][2] = CellScore::Unreadable;
        let err = decode_sheet(&scores, &template).unwrap_err();
        assert!(matches!(
            err,
            ReadError::TooManyUnreadable {
                field: FieldId::Answer(4),
                unreadable: 2,
                cells: 5
            }
        ));
        assert_eq!(compose(Err(err)), Reading::failure(ErrorKind::SheetDistorted));
    }

    #[test]
    fn panics_become_internal() {
        let reader = Reader::standard();
        let reading = reader.guarded(|| panic!("stage exploded"));
        assert_eq!(reading, Reading::failure(ErrorKind::Internal));
        assert_eq!(reading.to_record().erro, 6);
    }

    #[test]
    fn readers_and_templates_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Reader>();
        assert_send_sync::<SheetTemplate>();
        assert_send_sync::<Reading>();
        assert_send_sync::<ReadError>();
    }

    #[test]
    fn invalid_templates_are_refused() {
        let mut template = SheetTemplate::standard();
        template.bubble_radius = 0.0;
        assert!(Reader::new(template).is_err());
        assert_eq!(Reader::standard().template(), &SheetTemplate::standard());
    }
}

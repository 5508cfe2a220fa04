/// Errors returned by the sheet locator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LocateError {
    #[error("image has no usable contrast (paper-ink separation {contrast:.1})")]
    LowContrast { contrast: f32 },
    #[error("found {found} fiducial candidates, need 4")]
    NotEnoughFiducials { found: usize },
    #[error("fiducial candidates do not resolve to four distinct corners")]
    AmbiguousCorners,
    #[error("orientation mark found under {marked} of the 4 corner relabelings, need exactly 1")]
    OrientationNotFound { marked: usize },
    #[error("fiducials do not form a convex quad")]
    NotConvex,
    #[error("fiducial sizes are inconsistent (ratio {ratio:.2})")]
    FiducialSizeMismatch { ratio: f32 },
    #[error("sheet aspect {observed:.3} does not match template aspect {expected:.3}")]
    AspectMismatch { observed: f32, expected: f32 },
    #[error("sheet-to-image transform is degenerate")]
    DegenerateTransform,
    #[error("template content maps outside the image")]
    OutOfBounds,
}

impl LocateError {
    /// `true` when no sheet was found at all; `false` when a sheet was found
    /// but its geometry is unusable.
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            LocateError::LowContrast { .. }
                | LocateError::NotEnoughFiducials { .. }
                | LocateError::AmbiguousCorners
                | LocateError::OrientationNotFound { .. }
        )
    }
}

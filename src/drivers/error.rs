use thiserror::Error;
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no peak found in the search window")]
    NoPeakFound,
    #[error("invalid sweep: {0}")]
    InvalidInput(String),
    #[error("instrument communication failed: {0}")]
    InstrumentCommunication(String),
    #[error("unsupported device type: {found}")]
    DeviceTypeMismatch { found: String },
    #[error("gpio failure: {0}")]
    Gpio(String),
    #[error("electrode switch failed: {0}")]
    Switch(String),
    #[error("sequence error on line {line}: {reason}")]
    Sequence { line: usize, reason: String },
    #[error("curve shape mismatch: {0}")]
    CurveShape(String),
    #[error("failed to render plot: {0}")]
    Plot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
impl ScanError {
    /// Recoverable kinds are handled inside the scan driver and never stop the campaign.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ScanError::NoPeakFound)
    }
}
impl From<serialport::Error> for ScanError {
    fn from(value: serialport::Error) -> Self {
        ScanError::InstrumentCommunication(value.to_string())
    }
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for ScanError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        ScanError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for ScanError {
    fn from(value: image::ImageError) -> Self {
        ScanError::Plot(value.to_string())
    }
}

use core::fmt;

/// Failures reported by the actuation and configuration paths.
///
/// Measurement never fails this way: degenerate readings are clamped instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// radio channel is not in the code table
    InvalidChannel,
    /// protocol selector without an encoder
    UnsupportedRadioModel,
    /// the load roster is full
    TooManyLoads,
    /// a pin or the ADC reported a hardware error
    Io,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidChannel => "invalid channel",
            Error::UnsupportedRadioModel => "unsupported radio model",
            Error::TooManyLoads => "too many loads",
            Error::Io => "i/o error",
        })
    }
}

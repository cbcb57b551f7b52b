use std::collections::TryReserveError;

use crate::table::MeasurementKey;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Sample rate is invalid: {0}")]
    InvalidSampleRate(f32),
    #[error("Block length ({0}) should be a non-zero power of two")]
    InvalidBlockLen(usize),
    #[error("Invalid convolver setup: block {block_len}, fft {fft_len}, {partitions} partitions")]
    InvalidSetup {
        block_len: usize,
        fft_len: usize,
        partitions: usize,
    },
    #[error("Impulse response length must be non-zero")]
    ZeroFilterLength,
    #[error("Filter length ({0}) is invalid: {1}")]
    InvalidFilterLength(usize, usize),
    #[error("Input/Output length ({0}) does not fit block len ({1})")]
    InvalidInputOutputLen(usize, usize),
    #[error("Impulse response has {partitions} partitions, convolver expects {expected}")]
    InvalidImpulseResponse { partitions: usize, expected: usize },
    #[error("Convolver is used before setup")]
    NotConfigured,
    #[error("Impulse response table is not ready")]
    NotReady,
    #[error("Impulse response table setup is not in progress")]
    SetupNotInProgress,
    #[error("Impulse response table has no entries")]
    EmptyTable,
    #[error("Sample rate ({0}) does not match the table sample rate ({1})")]
    SampleRateMismatch(f32, f32),
    #[error("Measurement distance is invalid: {0}")]
    InvalidDistance(f32),
    #[error("Duplicate impulse response for {0}")]
    DuplicateEntry(MeasurementKey),
    #[error("Failed to allocate convolution buffers")]
    Allocation(#[from] TryReserveError),
    #[error("The owls are not what they seem")]
    InternalProcessingError(#[from] realfft::FftError),
}

impl Error {
    /// Returns `true` for errors that only reject a single request and leave
    /// the reporting object fully usable.
    pub fn is_warning(&self) -> bool {
        matches!(self, Error::DuplicateEntry(_))
    }
}

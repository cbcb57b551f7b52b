//! Frequency domain primitives shared by the partitioner and the convolvers.
//!
//! A [`FrequencyProcessor`] owns one planned forward/inverse real transform
//! pair of a fixed power-of-two size together with its scratch memory, so
//! every call after construction is allocation free.

use std::fmt;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::num_traits::Zero;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::Error;

#[derive(Clone)]
pub struct FrequencyProcessor {
    /// transform size in samples
    fft_len: usize,
    /// number of complex bins produced by the forward transform
    spectrum_len: usize,
    /// normalization applied after the inverse transform
    scale: f32,
    rfft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,
    rfft_scratch: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,
}

impl fmt::Debug for FrequencyProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyProcessor")
            .field("fft_len", &self.fft_len)
            .field("spectrum_len", &self.spectrum_len)
            .finish()
    }
}

impl FrequencyProcessor {
    /// Plan transforms of `fft_len` samples.
    ///
    /// Fails with [`Error::InvalidBlockLen`] unless `fft_len` is a power of
    /// two of at least 2.
    pub fn new(fft_len: usize) -> Result<Self, Error> {
        if fft_len < 2 || !fft_len.is_power_of_two() {
            return Err(Error::InvalidBlockLen(fft_len));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let rfft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let rfft_scratch = rfft.make_scratch_vec();
        let ifft_scratch = ifft.make_scratch_vec();

        Ok(Self {
            fft_len,
            spectrum_len: spectrum_len(fft_len),
            scale: 1.0 / fft_len as f32,
            rfft,
            ifft,
            rfft_scratch,
            ifft_scratch,
        })
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    pub fn spectrum_len(&self) -> usize {
        self.spectrum_len
    }

    /// Real to complex transform. `time` is clobbered.
    pub fn forward(
        &mut self,
        time: &mut [f32],
        spectrum: &mut [Complex<f32>],
    ) -> Result<(), Error> {
        self.rfft
            .process_with_scratch(time, spectrum, &mut self.rfft_scratch)?;
        Ok(())
    }

    /// Complex to real transform normalized by `1 / fft_len`, so that
    /// `inverse(forward(x))` reproduces `x`. `spectrum` is clobbered.
    pub fn inverse(
        &mut self,
        spectrum: &mut [Complex<f32>],
        time: &mut [f32],
    ) -> Result<(), Error> {
        // a real signal has purely real DC and Nyquist bins
        if let Some(dc) = spectrum.first_mut() {
            dc.im = 0.0;
        }
        if let Some(nyquist) = spectrum.last_mut() {
            nyquist.im = 0.0;
        }

        self.ifft
            .process_with_scratch(spectrum, time, &mut self.ifft_scratch)?;

        for sample in time.iter_mut() {
            *sample *= self.scale;
        }

        Ok(())
    }

    /// Point wise `acc[k] += a[k] * b[k]`.
    #[inline]
    pub fn multiply_accumulate(acc: &mut [Complex<f32>], a: &[Complex<f32>], b: &[Complex<f32>]) {
        debug_assert_eq!(acc.len(), a.len());
        debug_assert_eq!(acc.len(), b.len());

        for (acc, (a, b)) in Iterator::zip(acc.iter_mut(), Iterator::zip(a.iter(), b.iter())) {
            *acc += a * b;
        }
    }

    /// Allocate a zeroed spectrum buffer sized for this processor.
    pub fn make_spectrum(&self) -> Box<[Complex<f32>]> {
        vec![Complex::zero(); self.spectrum_len].into_boxed_slice()
    }
}

/// Number of complex bins in the real spectrum of an `fft_len` transform.
pub fn spectrum_len(fft_len: usize) -> usize {
    fft_len / 2 + 1
}

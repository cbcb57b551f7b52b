use realfft::num_complex::Complex;

use crate::partition::PartitionedIr;
use crate::upc::Core;
use crate::Error;

/// Number of leading sub-filters covered by `silenced_samples` initially
/// silent output samples.
pub fn silenced_partitions(silenced_samples: usize, block_len: usize) -> usize {
    match block_len {
        0 => 0,
        _ => silenced_samples / block_len,
    }
}

/// Sub-filters of `ir` left out of the sum. Once every real tap is
/// silenced the whole response is, including a partial last partition.
fn skipped_partitions(ir: &PartitionedIr, silenced_samples: usize, block_len: usize) -> usize {
    match silenced_samples >= ir.ir_len() {
        true => ir.partitions(),
        false => silenced_partitions(silenced_samples, block_len),
    }
}

/// Convolver for room (reverb) channels.
///
/// Room responses change slowly, so the response of the current call always
/// applies to the whole input history. Besides a time domain output it can
/// hand out the accumulated spectrum before the inverse transform, so the
/// spectra of several channels can be summed and transformed back once with
/// [`inverse`](Self::inverse).
///
/// The leading part of a response can be silenced: sub-filters fully covered
/// by `silenced_samples` are skipped, and a response whose taps are all
/// covered contributes nothing. This lets a reverb tail fade in without a
/// pre-roll click.
#[derive(Clone, Default)]
pub struct EnvironmentConvolver {
    core: Option<Core>,
}

impl EnvironmentConvolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and zero the input ring. Any previous history is discarded.
    pub fn setup(
        &mut self,
        input_block_size: usize,
        subfilter_frequency_size: usize,
        subfilter_count: usize,
    ) -> Result<(), Error> {
        self.core = None;
        self.core = Some(Core::new(
            input_block_size,
            subfilter_frequency_size,
            subfilter_count,
            false,
        )?);

        Ok(())
    }

    /// Convolve one block with `ir`, skipping the sub-filters covered by
    /// `silenced_samples`. On error the output is zero filled.
    pub fn process<I: AsRef<[f32]>, O: AsMut<[f32]>>(
        &mut self,
        input: I,
        ir: &PartitionedIr,
        mut output: O,
        silenced_samples: usize,
    ) -> Result<(), Error> {
        let output = output.as_mut();

        let result = match self.core.as_mut() {
            Some(core) => {
                let skip = skipped_partitions(ir, silenced_samples, core.block_len());
                core.convolve(input.as_ref(), ir, skip, output)
            }
            None => Err(Error::NotConfigured),
        };

        if result.is_err() {
            output.fill(0.0);
        }

        result
    }

    /// Like [`process`](Self::process) but writes the accumulated spectrum
    /// (`block_len + 1` bins) instead of a time domain block. On error the
    /// spectrum is zero filled.
    pub fn process_spectrum<I: AsRef<[f32]>>(
        &mut self,
        input: I,
        ir: &PartitionedIr,
        spectrum: &mut [Complex<f32>],
        silenced_samples: usize,
    ) -> Result<(), Error> {
        let result = match self.core.as_mut() {
            Some(core) => {
                let skip = skipped_partitions(ir, silenced_samples, core.block_len());
                core.convolve_spectrum(input.as_ref(), ir, skip, spectrum)
            }
            None => Err(Error::NotConfigured),
        };

        if result.is_err() {
            spectrum.fill(Complex::new(0.0, 0.0));
        }

        result
    }

    /// Turn a spectrum from [`process_spectrum`](Self::process_spectrum),
    /// or a sum of such spectra, into one output block. `spectrum` is used
    /// as scratch.
    pub fn inverse<O: AsMut<[f32]>>(
        &mut self,
        spectrum: &mut [Complex<f32>],
        mut output: O,
    ) -> Result<(), Error> {
        let output = output.as_mut();

        let result = match self.core.as_mut() {
            Some(core) => core.inverse(spectrum, output),
            None => Err(Error::NotConfigured),
        };

        if result.is_err() {
            output.fill(0.0);
        }

        result
    }

    /// Forget all input history, keep the configuration.
    pub fn reset(&mut self) {
        if let Some(core) = self.core.as_mut() {
            core.reset();
        }
    }

    pub fn is_configured(&self) -> bool {
        self.core.is_some()
    }

    pub fn block_len(&self) -> Option<usize> {
        self.core.as_ref().map(Core::block_len)
    }

    pub fn subfilter_count(&self) -> Option<usize> {
        self.core.as_ref().map(Core::partitions)
    }

    /// Length of the spectra exchanged with
    /// [`process_spectrum`](Self::process_spectrum).
    pub fn spectrum_len(&self) -> Option<usize> {
        self.core.as_ref().map(Core::spectrum_len)
    }
}

//! Uniformly partitioned convolution.
//!
//! Every call consumes one block of `B` input samples and produces `B`
//! output samples. The previous and the current block form a `2B` window
//! whose spectrum is stored in a frequency domain delay line of `N` slots,
//! `N` being the number of sub-filters of the impulse response. The output
//! spectrum is the sum over `i` of the `i`-th most recent input spectrum
//! times sub-filter `i`; one inverse transform per block turns it back into
//! time domain, and the second half of the result is the output block.
//!
//! For more details about the algorithm check Chapter 5 of Partitioned
//! convolution algorithms for real-time auralization: [`Book`]
//!
//! [`Book`]: https://publications.rwth-aachen.de/record/466561/files/466561.pdf

mod anechoic;
mod environment;

pub use anechoic::AnechoicConvolver;
pub use environment::{silenced_partitions, EnvironmentConvolver};

use realfft::num_complex::Complex;
use realfft::num_traits::Zero;

use crate::fft::FrequencyProcessor;
use crate::partition::PartitionedIr;
use crate::Error;

/// Fallibly allocated buffer of `len` copies of `value`.
pub(crate) fn zeroed<T: Clone>(len: usize, value: T) -> Result<Box<[T]>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)?;
    buf.resize(len, value);
    Ok(buf.into_boxed_slice())
}

/// Ring of input spectra, newest at `cursor`, walked backward.
#[derive(Clone)]
struct InputHistory {
    spectrum_len: usize,
    slots: usize,
    /// input blocks frequency domain delay line
    fdl: Box<[Complex<f32>]>,
    cursor: usize,
    /// previous raw input block
    prev: Box<[f32]>,
    /// previous and current block, transform scratch
    window: Box<[f32]>,
}

impl InputHistory {
    fn new(block_len: usize, spectrum_len: usize, slots: usize) -> Result<Self, Error> {
        Ok(Self {
            spectrum_len,
            slots,
            fdl: zeroed(spectrum_len * slots, Complex::zero())?,
            cursor: 0,
            prev: zeroed(block_len, 0.0)?,
            window: zeroed(2 * block_len, 0.0)?,
        })
    }

    /// Transform `prev ++ input` into the cursor slot, overwriting the
    /// oldest spectrum, and remember `input` as the previous block.
    fn push(&mut self, processor: &mut FrequencyProcessor, input: &[f32]) -> Result<(), Error> {
        let block_len = self.prev.len();

        self.window[..block_len].copy_from_slice(&self.prev);
        self.window[block_len..].copy_from_slice(input);

        let off = self.cursor * self.spectrum_len;
        processor.forward(&mut self.window, &mut self.fdl[off..off + self.spectrum_len])?;

        self.prev.copy_from_slice(input);

        Ok(())
    }

    /// Spectrum pushed `age` calls ago.
    #[inline]
    fn slot(&self, age: usize) -> &[Complex<f32>] {
        debug_assert!(age < self.slots);
        let index = (self.cursor + self.slots - age) % self.slots;
        debug_assert!(index < self.slots);

        let off = index * self.spectrum_len;
        &self.fdl[off..off + self.spectrum_len]
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.slots;
    }

    fn clear(&mut self) {
        self.fdl.fill(Complex::zero());
        self.prev.fill(0.0);
        self.window.fill(0.0);
        self.cursor = 0;
    }
}

/// Ring of the impulse responses that were current for each input spectrum.
///
/// The newest response sits at `cursor` and older ones follow it forward,
/// the opposite of [`InputHistory`]; the cursor retreats after every call.
#[derive(Clone)]
struct IrMemory {
    spectrum_len: usize,
    slots: usize,
    /// one whole partitioned response per slot
    stride: usize,
    arena: Box<[Complex<f32>]>,
    cursor: usize,
}

impl IrMemory {
    fn new(spectrum_len: usize, slots: usize) -> Result<Self, Error> {
        let stride = spectrum_len * slots;

        Ok(Self {
            spectrum_len,
            slots,
            stride,
            arena: zeroed(stride * slots, Complex::zero())?,
            cursor: 0,
        })
    }

    fn store(&mut self, ir: &PartitionedIr) {
        let off = self.cursor * self.stride;
        self.arena[off..off + self.stride].copy_from_slice(ir.as_slice());
    }

    /// Sub-filter `index` of the response stored `age` calls ago.
    #[inline]
    fn subfilter(&self, age: usize, index: usize) -> &[Complex<f32>] {
        debug_assert!(age < self.slots && index < self.slots);
        let slot = (self.cursor + age) % self.slots;
        debug_assert!(slot < self.slots);

        let off = slot * self.stride + index * self.spectrum_len;
        &self.arena[off..off + self.spectrum_len]
    }

    fn retreat(&mut self) {
        self.cursor = (self.cursor + self.slots - 1) % self.slots;
    }

    fn clear(&mut self) {
        self.arena.fill(Complex::zero());
        self.cursor = 0;
    }
}

/// State shared by every convolver flavour: transforms, rings and scratch.
#[derive(Clone)]
pub(crate) struct Core {
    block_len: usize,
    partitions: usize,
    processor: FrequencyProcessor,
    history: InputHistory,
    memory: Option<IrMemory>,
    /// accumulator for point wise multiplication
    acc: Box<[Complex<f32>]>,
    /// inverse transform output
    scratch: Box<[f32]>,
}

impl Core {
    pub(crate) fn new(
        block_len: usize,
        fft_len: usize,
        partitions: usize,
        with_memory: bool,
    ) -> Result<Self, Error> {
        let valid = block_len > 0
            && block_len.is_power_of_two()
            && fft_len == 2 * block_len
            && partitions > 0;

        if !valid {
            return Err(Error::InvalidSetup {
                block_len,
                fft_len,
                partitions,
            });
        }

        let processor = FrequencyProcessor::new(fft_len)?;
        let spectrum_len = processor.spectrum_len();

        let memory = match with_memory {
            true => Some(IrMemory::new(spectrum_len, partitions)?),
            false => None,
        };

        Ok(Self {
            block_len,
            partitions,
            history: InputHistory::new(block_len, spectrum_len, partitions)?,
            memory,
            acc: zeroed(spectrum_len, Complex::zero())?,
            scratch: zeroed(fft_len, 0.0)?,
            processor,
        })
    }

    pub(crate) fn block_len(&self) -> usize {
        self.block_len
    }

    pub(crate) fn partitions(&self) -> usize {
        self.partitions
    }

    pub(crate) fn spectrum_len(&self) -> usize {
        self.processor.spectrum_len()
    }

    pub(crate) fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    fn check_len(&self, len: usize, expected: usize) -> Result<(), Error> {
        match len == expected {
            true => Ok(()),
            false => Err(Error::InvalidInputOutputLen(len, expected)),
        }
    }

    fn check_ir(&self, ir: &PartitionedIr) -> Result<(), Error> {
        if ir.partitions() != self.partitions || ir.spectrum_len() != self.spectrum_len() {
            return Err(Error::InvalidImpulseResponse {
                partitions: ir.partitions(),
                expected: self.partitions,
            });
        }

        Ok(())
    }

    /// Record `input` and sum its spectral contributions into `acc`,
    /// leaving the first `skip` sub-filters out. Nothing is touched when
    /// validation fails.
    fn accumulate(&mut self, input: &[f32], ir: &PartitionedIr, skip: usize) -> Result<(), Error> {
        self.check_len(input.len(), self.block_len)?;
        self.check_ir(ir)?;

        self.history.push(&mut self.processor, input)?;

        self.acc.fill(Complex::zero());

        match self.memory.as_mut() {
            Some(memory) => {
                memory.store(ir);

                for age in skip..self.partitions {
                    FrequencyProcessor::multiply_accumulate(
                        &mut self.acc,
                        self.history.slot(age),
                        memory.subfilter(age, age),
                    );
                }

                memory.retreat();
            }
            None => {
                for age in skip..self.partitions {
                    FrequencyProcessor::multiply_accumulate(
                        &mut self.acc,
                        self.history.slot(age),
                        ir.subfilter(age),
                    );
                }
            }
        }

        self.history.advance();

        Ok(())
    }

    /// Inverse transform the accumulator and keep the alias free second half.
    fn finish(&mut self, output: &mut [f32]) -> Result<(), Error> {
        self.processor.inverse(&mut self.acc, &mut self.scratch)?;
        output.copy_from_slice(&self.scratch[self.block_len..]);
        Ok(())
    }

    pub(crate) fn convolve(
        &mut self,
        input: &[f32],
        ir: &PartitionedIr,
        skip: usize,
        output: &mut [f32],
    ) -> Result<(), Error> {
        self.check_len(output.len(), self.block_len)?;
        self.accumulate(input, ir, skip)?;
        self.finish(output)
    }

    pub(crate) fn convolve_spectrum(
        &mut self,
        input: &[f32],
        ir: &PartitionedIr,
        skip: usize,
        spectrum: &mut [Complex<f32>],
    ) -> Result<(), Error> {
        self.check_len(spectrum.len(), self.spectrum_len())?;
        self.accumulate(input, ir, skip)?;
        spectrum.copy_from_slice(&self.acc);
        Ok(())
    }

    /// Time domain block of a spectrum produced by
    /// [`convolve_spectrum`](Self::convolve_spectrum), possibly summed over
    /// several convolvers. `spectrum` is clobbered.
    pub(crate) fn inverse(
        &mut self,
        spectrum: &mut [Complex<f32>],
        output: &mut [f32],
    ) -> Result<(), Error> {
        self.check_len(spectrum.len(), self.spectrum_len())?;
        self.check_len(output.len(), self.block_len)?;

        self.processor.inverse(spectrum, &mut self.scratch)?;
        output.copy_from_slice(&self.scratch[self.block_len..]);

        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.history.clear();
        if let Some(memory) = self.memory.as_mut() {
            memory.clear();
        }
        self.acc.fill(Complex::zero());
        self.scratch.fill(0.0);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::partition::Partitioner;
    use assert_approx_eq::assert_approx_eq;

    /// Linear convolution of `x` with `h`, truncated to `x.len()` samples.
    pub(crate) fn convolve_from_definition(x: &[f32], h: &[f32]) -> Vec<f32> {
        let mut x_neg_terms = vec![0.0; h.len() - 1];
        x_neg_terms.extend_from_slice(x);

        (0..x.len())
            .map(|i| {
                Iterator::zip(x_neg_terms.iter().skip(i), h.iter().rev())
                    .map(|(x, h)| x * h)
                    .fold(0.0, |acc, x| acc + x)
            })
            .collect::<Vec<_>>()
    }

    #[test]
    fn input_ring_walks_backward_from_cursor() {
        let mut fp = FrequencyProcessor::new(4).unwrap();
        let mut history = InputHistory::new(2, 3, 3).unwrap();

        for block in 1..=4 {
            let v = block as f32;
            history.push(&mut fp, &[v, v]).unwrap();
            if block < 4 {
                history.advance();
            }
        }

        // DC bin of a window is the sum of the previous and current block,
        // the first window was overwritten by the fourth
        assert_eq!(history.cursor, 0);
        assert_approx_eq!(history.slot(0)[0].re, 14.0, 1e-5);
        assert_approx_eq!(history.slot(1)[0].re, 10.0, 1e-5);
        assert_approx_eq!(history.slot(2)[0].re, 6.0, 1e-5);
    }

    #[test]
    fn memory_ring_walks_forward_from_cursor() {
        let mut partitioner = Partitioner::new(1).unwrap();
        let mut memory = IrMemory::new(2, 3).unwrap();

        for value in 1..=4 {
            let v = value as f32;
            let ir = partitioner.partition(&[v, v, v]).unwrap();
            memory.store(&ir);
            if value < 4 {
                memory.retreat();
            }
        }

        assert_eq!(memory.cursor, 0);
        assert_approx_eq!(memory.subfilter(0, 0)[0].re, 4.0, 1e-5);
        assert_approx_eq!(memory.subfilter(1, 1)[0].re, 3.0, 1e-5);
        assert_approx_eq!(memory.subfilter(2, 2)[0].re, 2.0, 1e-5);
    }
}

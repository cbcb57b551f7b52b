//! Splitting of time domain impulse responses into uniformly sized
//! frequency domain sub-filters.
//!
//! An impulse response of `L` taps partitioned for a block length `B` yields
//! `ceil(L / B)` sub-filters. Each sub-filter is the real spectrum of a
//! `2 * B` transform whose input holds `B` taps followed by `B` zeros; the
//! last chunk of taps is zero padded, nothing is ever truncated.

use realfft::num_complex::Complex;
use realfft::num_traits::Zero;

use crate::fft::{spectrum_len, FrequencyProcessor};
use crate::upc::zeroed;
use crate::Error;

/// Impulse response split into frequency domain partitions.
///
/// The default value is the empty sentinel returned by failed lookups: it has
/// no partitions and is refused by every convolver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionedIr {
    block_len: usize,
    spectrum_len: usize,
    partitions: usize,
    /// number of taps the response was partitioned from
    ir_len: usize,
    delay: Option<usize>,
    /// `partitions` spectra of `spectrum_len` bins, back to back
    data: Box<[Complex<f32>]>,
}

impl PartitionedIr {
    /// The empty sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Zeroed impulse response with the given shape, covering
    /// `partitions * block_len` taps.
    pub fn zeroed(block_len: usize, partitions: usize) -> Result<Self, Error> {
        let spectrum_len = spectrum_len(2 * block_len);

        Ok(Self {
            block_len,
            spectrum_len,
            partitions,
            ir_len: partitions * block_len,
            delay: None,
            data: zeroed(spectrum_len * partitions, Complex::zero())?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.partitions == 0
    }

    /// Number of sub-filters.
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Number of time domain taps, at most `partitions() * block_len()`.
    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// Size of the transform every sub-filter was computed with.
    pub fn fft_len(&self) -> usize {
        2 * self.block_len
    }

    pub fn spectrum_len(&self) -> usize {
        self.spectrum_len
    }

    /// Onset delay in samples carried over from the raw response, if the
    /// measurement provided one.
    pub fn delay(&self) -> Option<usize> {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Option<usize>) {
        self.delay = delay;
    }

    /// Spectrum of the `index`-th sub-filter.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.partitions()`.
    #[inline]
    pub fn subfilter(&self, index: usize) -> &[Complex<f32>] {
        assert!(index < self.partitions);
        let off = index * self.spectrum_len;
        &self.data[off..off + self.spectrum_len]
    }

    pub fn subfilters(&self) -> impl Iterator<Item = &[Complex<f32>]> {
        (0..self.partitions).map(move |i| self.subfilter(i))
    }

    pub(crate) fn as_slice(&self) -> &[Complex<f32>] {
        &self.data
    }

    /// `true` when both responses can be used with the same convolver.
    pub fn same_shape(&self, other: &PartitionedIr) -> bool {
        self.block_len == other.block_len
            && self.spectrum_len == other.spectrum_len
            && self.partitions == other.partitions
    }
}

/// Number of sub-filters an `ir_len` tap response needs at `block_len`.
pub fn partition_count(ir_len: usize, block_len: usize) -> usize {
    (ir_len + block_len - 1) / block_len
}

/// Turns time domain taps into [`PartitionedIr`]s for one block length.
#[derive(Clone, Debug)]
pub struct Partitioner {
    block_len: usize,
    processor: FrequencyProcessor,
    /// filter padding to block_len * 2
    filt_pad: Box<[f32]>,
}

impl Partitioner {
    pub fn new(block_len: usize) -> Result<Self, Error> {
        if block_len == 0 || !block_len.is_power_of_two() {
            return Err(Error::InvalidBlockLen(block_len));
        }

        let processor = FrequencyProcessor::new(2 * block_len)?;

        Ok(Self {
            block_len,
            processor,
            filt_pad: vec![0.0; 2 * block_len].into_boxed_slice(),
        })
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Partition `taps` into a freshly allocated [`PartitionedIr`].
    pub fn partition(&mut self, taps: &[f32]) -> Result<PartitionedIr, Error> {
        let partitions = partition_count(taps.len(), self.block_len);
        let mut ir = PartitionedIr::zeroed(self.block_len, partitions)?;
        self.partition_into(taps, &mut ir)?;
        Ok(ir)
    }

    /// Partition `taps` into an existing response without allocating.
    ///
    /// `ir` must have been created for the same block length and the number
    /// of partitions `taps` needs, otherwise
    /// [`Error::InvalidImpulseResponse`] is returned and `ir` is untouched.
    pub fn partition_into(&mut self, taps: &[f32], ir: &mut PartitionedIr) -> Result<(), Error> {
        let block_len = self.block_len;
        let spectrum_len = self.processor.spectrum_len();
        let expected = partition_count(taps.len(), block_len);

        if ir.block_len != block_len || ir.spectrum_len != spectrum_len || ir.partitions != expected
        {
            return Err(Error::InvalidImpulseResponse {
                partitions: ir.partitions,
                expected,
            });
        }

        let spectra = ir.data.chunks_exact_mut(spectrum_len);

        for (chunk, h) in Iterator::zip(taps.chunks(block_len), spectra) {
            self.filt_pad[..chunk.len()].copy_from_slice(chunk);
            self.filt_pad[chunk.len()..].fill(0.0);

            self.processor.forward(&mut self.filt_pad, h)?;
        }

        ir.ir_len = taps.len();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn taps(len: usize) -> Vec<f32> {
        (1..=len).map(|v| ((v as f32) * 0.61).cos() / v as f32).collect()
    }

    fn check_roundtrip(ir_len: usize, block_len: usize) {
        let taps = taps(ir_len);
        let mut partitioner = Partitioner::new(block_len).unwrap();
        let ir = partitioner.partition(&taps).unwrap();

        let expected_partitions = (ir_len + block_len - 1) / block_len;
        assert_eq!(ir.partitions(), expected_partitions);
        assert_eq!(ir.ir_len(), ir_len);
        assert_eq!(ir.fft_len(), 2 * block_len);
        assert_eq!(ir.spectrum_len(), block_len + 1);

        let mut fp = FrequencyProcessor::new(2 * block_len).unwrap();
        let mut time = vec![0.0; 2 * block_len];
        let mut restored = Vec::new();

        for sub in ir.subfilters() {
            let mut spectrum = sub.to_vec();
            assert_approx_eq!(spectrum[0].im, 0.0, 1e-6);
            assert_approx_eq!(spectrum[block_len].im, 0.0, 1e-6);

            fp.inverse(&mut spectrum, &mut time).unwrap();

            // doubled with trailing zeros
            for s in &time[block_len..] {
                assert_approx_eq!(*s, 0.0, 1e-5);
            }
            restored.extend_from_slice(&time[..block_len]);
        }

        // final block is zero padded past the end of the taps
        for s in &restored[ir_len..] {
            assert_approx_eq!(*s, 0.0, 1e-5);
        }

        restored.truncate(ir_len);
        for (a, b) in Iterator::zip(taps.iter(), restored.iter()) {
            assert_approx_eq!(a, b, 1e-5);
        }
    }

    #[test]
    fn partition_exact_multiple() {
        check_roundtrip(64, 16);
    }

    #[test]
    fn partition_pads_last_block() {
        check_roundtrip(100, 32);
        check_roundtrip(17, 4);
    }

    #[test]
    fn partition_shorter_than_block() {
        check_roundtrip(3, 64);
    }

    #[test]
    fn partition_many_sizes() {
        for block_len in [1, 2, 8, 128] {
            for ir_len in [1, 7, 128, 255, 513] {
                check_roundtrip(ir_len, block_len);
            }
        }
    }

    #[test]
    fn partition_empty_taps() {
        let mut partitioner = Partitioner::new(8).unwrap();
        let ir = partitioner.partition(&[]).unwrap();
        assert!(ir.is_empty());
    }

    #[test]
    fn partition_into_rejects_wrong_shape() {
        let mut partitioner = Partitioner::new(8).unwrap();
        let mut ir = PartitionedIr::zeroed(8, 2).unwrap();
        assert_eq!(ir.ir_len(), 16);

        let err = partitioner.partition_into(&taps(24), &mut ir).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidImpulseResponse {
                partitions: 2,
                expected: 3
            }
        ));

        partitioner.partition_into(&taps(13), &mut ir).unwrap();
        assert_eq!(ir.ir_len(), 13);
        assert_eq!(ir, partitioner.partition(&taps(13)).unwrap());
    }

    #[test]
    fn oversized_response_reports_allocation_failure() {
        assert!(matches!(
            PartitionedIr::zeroed(1, usize::MAX / 4),
            Err(Error::Allocation(_))
        ));
    }

    #[test]
    fn rejects_invalid_block_len() {
        assert!(matches!(Partitioner::new(0), Err(Error::InvalidBlockLen(0))));
        assert!(matches!(Partitioner::new(48), Err(Error::InvalidBlockLen(48))));
    }
}

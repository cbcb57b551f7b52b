use crate::partition::PartitionedIr;
use crate::upc::Core;
use crate::Error;

/// Per voice convolver for direct (anechoic) sound.
///
/// The partitioned response is passed to every [`process`](Self::process)
/// call, the caller is free to pick a different one each block. Without
/// memory the whole input history is filtered by the response of the current
/// call. With memory every past input block keeps being filtered by the
/// response that was current when it arrived, which avoids artifacts while a
/// source moves; the price is one stored copy of the response per partition.
///
/// ```
/// use binconv::partition::Partitioner;
/// use binconv::upc::AnechoicConvolver;
///
/// let mut partitioner = Partitioner::new(4).unwrap();
/// let ir = partitioner.partition(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
///
/// let mut convolver = AnechoicConvolver::new();
/// convolver.setup(4, 8, ir.partitions(), false).unwrap();
///
/// let mut output = [0.0f32; 4];
/// convolver.process([1.0f32, 2.0, 3.0, 4.0], &ir, &mut output).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct AnechoicConvolver {
    core: Option<Core>,
}

impl AnechoicConvolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and zero all rings for blocks of `input_block_size` samples,
    /// sub-filter transforms of `subfilter_frequency_size` samples (twice the
    /// block size) and `subfilter_count` partitions.
    ///
    /// Any previous history is discarded. On failure the convolver is left
    /// unconfigured.
    pub fn setup(
        &mut self,
        input_block_size: usize,
        subfilter_frequency_size: usize,
        subfilter_count: usize,
        with_memory: bool,
    ) -> Result<(), Error> {
        self.core = None;
        self.core = Some(Core::new(
            input_block_size,
            subfilter_frequency_size,
            subfilter_count,
            with_memory,
        )?);

        Ok(())
    }

    /// Convolve one block of input with `ir` and write one block of output.
    ///
    /// On error the output is zero filled and the convolver state is left as
    /// it was before the call.
    pub fn process<I: AsRef<[f32]>, O: AsMut<[f32]>>(
        &mut self,
        input: I,
        ir: &PartitionedIr,
        mut output: O,
    ) -> Result<(), Error> {
        let output = output.as_mut();

        let result = match self.core.as_mut() {
            Some(core) => core.convolve(input.as_ref(), ir, 0, output),
            None => Err(Error::NotConfigured),
        };

        if result.is_err() {
            output.fill(0.0);
        }

        result
    }

    /// Forget all input (and response) history, keep the configuration.
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

    pub fn has_memory(&self) -> bool {
        self.core.as_ref().map_or(false, Core::has_memory)
    }
}

//! Binaural renderer for a single moving source.
//!
//! The renderer follows the table published by an
//! [`ImpulseResponseTable`](crate::table::ImpulseResponseTable) through a
//! [`TableReader`]. Each ear owns a with-memory [`AnechoicConvolver`], so a
//! source can change direction every block without clicks, and a
//! [`DelayLine`] for the onset delay carried by the responses.

use std::sync::Arc;

use log::{debug, warn};

use crate::delay::DelayLine;
use crate::table::{Direction, Ear, MeasurementKey, PartitionedTable, TableReader};
use crate::upc::AnechoicConvolver;
use crate::Error;

const DEFAULT_MAX_DELAY: usize = 256;

#[derive(Clone)]
struct Channel {
    ear: Ear,
    convolver: AnechoicConvolver,
    delay: DelayLine,
    /// key of the response missing since the last rendered block
    missing: Option<MeasurementKey>,
}

impl Channel {
    fn new(ear: Ear, max_delay: usize) -> Result<Self, Error> {
        Ok(Channel {
            ear,
            convolver: AnechoicConvolver::new(),
            delay: DelayLine::new(max_delay)?,
            missing: None,
        })
    }

    fn setup(&mut self, table: &PartitionedTable) -> Result<(), Error> {
        self.convolver.setup(
            table.block_len(),
            table.fft_len(),
            table.subfilter_count(),
            true,
        )?;
        self.delay.reset();
        self.missing = None;

        Ok(())
    }

    /// Render one block.
    ///
    /// A missing response renders silence. The convolver history is cleared
    /// when the response goes missing, so it restarts from silence once a
    /// response is found again, and the miss is logged once per key.
    fn render(
        &mut self,
        table: &PartitionedTable,
        direction: Direction,
        input: &[f32],
        output: &mut [f32],
        delays: bool,
    ) -> Result<(), Error> {
        let key = MeasurementKey::Direction(direction, self.ear);

        let delay = match table.get(&key) {
            Some(ir) => {
                self.missing = None;
                self.convolver.process(input, ir, &mut *output)?;
                ir.delay()
            }
            None => {
                if self.missing.is_none() {
                    self.convolver.reset();
                }
                if self.missing != Some(key) {
                    warn!("No impulse response for {}, rendering silence", key);
                    self.missing = Some(key);
                }
                output.fill(0.0);
                None
            }
        };

        if delays {
            // no delay stored means no delay
            self.delay.set_delay(delay.unwrap_or(0));
            self.delay.apply(output);
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.convolver.reset();
        self.delay.reset();
        self.missing = None;
    }
}

#[must_use]
pub struct RendererBuilder {
    reader: TableReader,
    delays: bool,
    max_delay: usize,
}

impl RendererBuilder {
    fn new(reader: TableReader) -> RendererBuilder {
        RendererBuilder {
            reader,
            delays: true,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Apply the onset delay stored with each impulse response. Enabled by
    /// default.
    pub fn with_delays(mut self, delays: bool) -> Self {
        self.delays = delays;
        self
    }

    /// Largest onset delay in samples the renderer can honor, longer delays
    /// are clamped. Default value is 256.
    pub fn with_max_delay(mut self, max_delay: usize) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Try to build [Renderer](crate::render::Renderer)
    ///
    /// If the table is already published the convolvers are configured for
    /// it, otherwise rendering fails with [`Error::NotReady`] until a table
    /// shows up and [`Renderer::refresh`] is called.
    pub fn build(self) -> Result<Renderer, Error> {
        let mut renderer = Renderer {
            reader: self.reader,
            table: None,
            delays: self.delays,
            left: Channel::new(Ear::Left, self.max_delay)?,
            right: Channel::new(Ear::Right, self.max_delay)?,
        };

        renderer.refresh()?;

        Ok(renderer)
    }
}

#[derive(Clone)]
pub struct Renderer {
    reader: TableReader,
    /// snapshot the convolvers are configured for
    table: Option<Arc<PartitionedTable>>,
    delays: bool,
    /// left channel data
    left: Channel,
    /// right channel data
    right: Channel,
}

impl Renderer {
    /// Get default [`renderer builder`](crate::render::RendererBuilder)
    pub fn builder(reader: TableReader) -> RendererBuilder {
        RendererBuilder::new(reader)
    }

    /// Pick up the latest published table.
    ///
    /// When a new generation is published both ear convolvers are set up
    /// again, which allocates, so call this outside of the audio callback.
    /// Returns `true` if the renderer switched to a new table. While a
    /// table is being rebuilt nothing is published and the renderer drops
    /// its snapshot.
    pub fn refresh(&mut self) -> Result<bool, Error> {
        let latest = match self.reader.load() {
            Some(table) => table,
            None => {
                self.table = None;
                return Ok(false);
            }
        };

        let current = self.table.as_ref().map(|table| table.generation());
        if current == Some(latest.generation()) {
            return Ok(false);
        }

        // unpin first so a failed setup never renders with stale rings
        self.table = None;
        self.left.setup(&latest)?;
        self.right.setup(&latest)?;

        debug!(
            "Renderer switched to table generation {} ({} taps, {} samples per block)",
            latest.generation(),
            latest.ir_len(),
            latest.block_len()
        );

        self.table = Some(latest);

        Ok(true)
    }

    /// Process a block of input samples and render output to left and right
    /// channels for a source at `direction`.
    ///
    /// The input and both outputs must have the same length, a multiple of
    /// the table block length. On error both outputs are silent.
    pub fn process_block<I: AsRef<[f32]>, O: AsMut<[f32]>>(
        &mut self,
        input: I,
        direction: Direction,
        mut left: O,
        mut right: O,
    ) -> Result<(), Error> {
        let input = input.as_ref();
        let left = left.as_mut();
        let right = right.as_mut();

        let result = self.render(input, direction, left, right);

        if result.is_err() {
            left.fill(0.0);
            right.fill(0.0);
        }

        result
    }

    fn render(
        &mut self,
        input: &[f32],
        direction: Direction,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<(), Error> {
        let table = self.table.as_deref().ok_or(Error::NotReady)?;
        let block_len = table.block_len();

        if left.len() != input.len() || right.len() != input.len() {
            let len = left.len().max(right.len());
            return Err(Error::InvalidInputOutputLen(len, input.len()));
        }

        if usize::rem_euclid(input.len(), block_len) != 0 {
            return Err(Error::InvalidInputOutputLen(input.len(), block_len));
        }

        for ((x, l), r) in input
            .chunks_exact(block_len)
            .zip(left.chunks_exact_mut(block_len))
            .zip(right.chunks_exact_mut(block_len))
        {
            self.left.render(table, direction, x, l, self.delays)?;
            self.right.render(table, direction, x, r, self.delays)?;
        }

        Ok(())
    }

    /// Reset all internals buffers
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    pub fn is_ready(&self) -> bool {
        self.table.is_some()
    }

    /// Generation of the table the renderer currently uses.
    pub fn generation(&self) -> Option<u64> {
        self.table.as_ref().map(|table| table.generation())
    }

    pub fn block_len(&self) -> Option<usize> {
        self.table.as_ref().map(|table| table.block_len())
    }

    pub fn delays(&self) -> bool {
        self.delays
    }
}

//! Impulse response tables.
//!
//! An [`ImpulseResponseTable`] collects raw time domain measurements keyed by
//! [`MeasurementKey`] and, once setup ends, partitions all of them for the
//! configured block length. The partitioned result is an immutable
//! [`PartitionedTable`] published through an atomically swapped handle, so a
//! render thread holding a [`TableReader`] never sees a half built table and
//! never waits for one.
//!
//! ```
//! use binconv::table::{Ear, ImpulseResponseTable, MeasurementKey, RawImpulseResponse};
//!
//! let mut table = ImpulseResponseTable::builder()
//!     .with_sample_rate(44100.0)
//!     .with_block_len(64)
//!     .build()
//!     .unwrap();
//!
//! let reader = table.reader();
//!
//! table.begin_setup(128).unwrap();
//! table
//!     .add(
//!         MeasurementKey::direction(90.0, 0.0, Ear::Left),
//!         RawImpulseResponse::new(vec![0.0; 128]),
//!     )
//!     .unwrap();
//! table.end_setup().unwrap();
//!
//! let snapshot = reader.load().unwrap();
//! assert_eq!(snapshot.subfilter_count(), 2);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use log::{debug, warn};

use crate::partition::{partition_count, PartitionedIr, Partitioner};
use crate::Error;

const DEFAULT_SAMPLE_RATE: f32 = 48000.0;
const DEFAULT_BLOCK_LEN: usize = 256;

/// Angles are stored in hundredths of a degree.
const ANGLE_RESOLUTION: f32 = 100.0;
const FULL_TURN: i32 = 360 * 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ear {
    Left,
    Right,
}

/// Fixed canonical directions used as anchors for room responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VirtualSpeaker {
    North,
    South,
    East,
    West,
    Zenith,
    Nadir,
}

/// Measurement direction in degrees.
///
/// Azimuth is wrapped into `[0, 360)`, elevation is kept as given. Both are
/// quantized to a hundredth of a degree so directions can be hashed and
/// compared exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Direction {
    azimuth: i32,
    elevation: i32,
}

impl Direction {
    pub fn new(azimuth: f32, elevation: f32) -> Self {
        let azimuth = ((azimuth * ANGLE_RESOLUTION).round() as i32).rem_euclid(FULL_TURN);
        let elevation = (elevation * ANGLE_RESOLUTION).round() as i32;

        Self {
            azimuth,
            elevation,
        }
    }

    pub fn azimuth(&self) -> f32 {
        self.azimuth as f32 / ANGLE_RESOLUTION
    }

    pub fn elevation(&self) -> f32 {
        self.elevation as f32 / ANGLE_RESOLUTION
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeasurementKey {
    /// Head related response for one ear.
    Direction(Direction, Ear),
    /// Room response of a virtual speaker for one ear.
    Speaker(VirtualSpeaker, Ear),
}

impl MeasurementKey {
    pub fn direction(azimuth: f32, elevation: f32, ear: Ear) -> Self {
        MeasurementKey::Direction(Direction::new(azimuth, elevation), ear)
    }

    pub fn speaker(speaker: VirtualSpeaker, ear: Ear) -> Self {
        MeasurementKey::Speaker(speaker, ear)
    }

    pub fn ear(&self) -> Ear {
        match self {
            MeasurementKey::Direction(_, ear) | MeasurementKey::Speaker(_, ear) => *ear,
        }
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementKey::Direction(dir, ear) => write!(
                f,
                "azimuth {:.2}, elevation {:.2} ({:?} ear)",
                dir.azimuth(),
                dir.elevation(),
                ear
            ),
            MeasurementKey::Speaker(speaker, ear) => {
                write!(f, "{:?} speaker ({:?} ear)", speaker, ear)
            }
        }
    }
}

/// Time domain impulse response as delivered by a measurement provider.
#[derive(Clone, Debug, PartialEq)]
pub struct RawImpulseResponse {
    taps: Box<[f32]>,
    /// onset delay in samples, when the provider measured one
    delay: Option<usize>,
}

impl RawImpulseResponse {
    pub fn new<T: Into<Box<[f32]>>>(taps: T) -> Self {
        Self {
            taps: taps.into(),
            delay: None,
        }
    }

    /// Attach an onset delay, in samples, to the response.
    pub fn with_delay(mut self, delay: usize) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    pub fn delay(&self) -> Option<usize> {
        self.delay
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

/// Description of a measurement set, checked before setup starts.
#[derive(Clone, Debug, PartialEq)]
pub struct IrMetadata {
    pub sample_rate: f32,
    pub ir_len: usize,
    /// distance between source and listener during measurement, in meters
    pub distance: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupState {
    NotConfigured,
    InProgress,
    Ready,
}

/// Immutable partitioned snapshot of a table, shared with the render thread.
#[derive(Debug)]
pub struct PartitionedTable {
    generation: u64,
    sample_rate: f32,
    block_len: usize,
    ir_len: usize,
    entries: HashMap<MeasurementKey, PartitionedIr>,
    empty: PartitionedIr,
}

impl PartitionedTable {
    /// Partitioned response for `key`, or the empty sentinel plus a warning
    /// when the table has no such entry.
    pub fn lookup(&self, key: &MeasurementKey) -> &PartitionedIr {
        match self.entries.get(key) {
            Some(ir) => ir,
            None => {
                warn!("No impulse response for {}", key);
                &self.empty
            }
        }
    }

    pub fn get(&self, key: &MeasurementKey) -> Option<&PartitionedIr> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &MeasurementKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &MeasurementKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Increases every time a table publishes a new snapshot. Consumers
    /// compare it to decide whether their convolvers need a new setup.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn fft_len(&self) -> usize {
        2 * self.block_len
    }

    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// Number of sub-filters of every entry.
    pub fn subfilter_count(&self) -> usize {
        partition_count(self.ir_len, self.block_len)
    }
}

/// Read side of a table, cheap to clone and safe to use from the render
/// thread.
#[derive(Clone)]
pub struct TableReader {
    published: Arc<ArcSwapOption<PartitionedTable>>,
}

impl TableReader {
    /// Latest published snapshot, `None` while no table is ready.
    pub fn load(&self) -> Option<Arc<PartitionedTable>> {
        self.published.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.published.load().is_some()
    }
}

impl fmt::Debug for TableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableReader")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[must_use]
pub struct TableBuilder {
    sample_rate: f32,
    block_len: usize,
}

impl TableBuilder {
    fn new() -> TableBuilder {
        TableBuilder {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_len: DEFAULT_BLOCK_LEN,
        }
    }

    /// Set sampling rate of the measurements. Default value is 48_000.0.
    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the audio block length the table is partitioned for. Must be a
    /// power of two. Default value is 256.
    pub fn with_block_len(mut self, block_len: usize) -> Self {
        self.block_len = block_len;
        self
    }

    /// Try to build [ImpulseResponseTable](crate::table::ImpulseResponseTable)
    ///
    /// This will fail if sampling rate set is invalid, e.g.: is negative or 0,
    /// or if the block length is not a power of two.
    pub fn build(self) -> Result<ImpulseResponseTable, Error> {
        let sample_rate = validate_sample_rate(self.sample_rate)?;
        let partitioner = Partitioner::new(self.block_len)?;

        Ok(ImpulseResponseTable {
            sample_rate,
            partitioner,
            state: SetupState::NotConfigured,
            ir_len: 0,
            distance: None,
            raw: HashMap::new(),
            current: None,
            published: Arc::new(ArcSwapOption::empty()),
            generation: 0,
            empty: PartitionedIr::empty(),
        })
    }
}

fn validate_sample_rate(sample_rate: f32) -> Result<f32, Error> {
    match sample_rate.is_normal() && sample_rate.is_sign_positive() {
        true => Ok(sample_rate),
        false => Err(Error::InvalidSampleRate(sample_rate)),
    }
}

/// Write side of an impulse response table. See module docs.
pub struct ImpulseResponseTable {
    sample_rate: f32,
    partitioner: Partitioner,
    state: SetupState,
    ir_len: usize,
    distance: Option<f32>,
    raw: HashMap<MeasurementKey, RawImpulseResponse>,
    /// snapshot of the last successful setup, only while ready
    current: Option<Arc<PartitionedTable>>,
    published: Arc<ArcSwapOption<PartitionedTable>>,
    generation: u64,
    empty: PartitionedIr,
}

impl ImpulseResponseTable {
    /// Get default [`table builder`](crate::table::TableBuilder)
    pub fn builder() -> TableBuilder {
        TableBuilder::new()
    }

    /// Start a new setup for responses of `ir_len` taps.
    ///
    /// Drops every entry of the previous setup and withdraws the published
    /// snapshot, so lookups fail until [`end_setup`](Self::end_setup)
    /// succeeds again.
    pub fn begin_setup(&mut self, ir_len: usize) -> Result<(), Error> {
        if ir_len == 0 {
            return Err(Error::ZeroFilterLength);
        }

        self.raw.clear();
        self.current = None;
        self.published.store(None);

        self.ir_len = ir_len;
        self.distance = None;
        self.state = SetupState::InProgress;

        debug!("Impulse response table setup started, {} taps", ir_len);

        Ok(())
    }

    /// Validate provider metadata against this table and start a setup.
    pub fn begin_setup_with(&mut self, metadata: &IrMetadata) -> Result<(), Error> {
        if metadata.sample_rate != self.sample_rate {
            return Err(Error::SampleRateMismatch(
                metadata.sample_rate,
                self.sample_rate,
            ));
        }

        if let Some(distance) = metadata.distance {
            if !(distance.is_finite() && distance > 0.0) {
                return Err(Error::InvalidDistance(distance));
            }
        }

        self.begin_setup(metadata.ir_len)?;
        self.distance = metadata.distance;

        Ok(())
    }

    /// Insert one response.
    ///
    /// Only valid during setup and only for responses of the length given to
    /// [`begin_setup`](Self::begin_setup). A key that is already present is
    /// reported with [`Error::DuplicateEntry`] and the first entry is kept;
    /// the setup itself is unaffected.
    pub fn add(&mut self, key: MeasurementKey, ir: RawImpulseResponse) -> Result<(), Error> {
        if self.state != SetupState::InProgress {
            return Err(Error::SetupNotInProgress);
        }

        if ir.len() != self.ir_len {
            return Err(Error::InvalidFilterLength(ir.len(), self.ir_len));
        }

        if self.raw.contains_key(&key) {
            warn!("Impulse response for {} already present, ignoring", key);
            return Err(Error::DuplicateEntry(key));
        }

        self.raw.try_reserve(1)?;
        self.raw.insert(key, ir);

        Ok(())
    }

    /// Partition every entry and publish the result.
    ///
    /// Returns the published snapshot; its generation tells consumers that
    /// convolution buffers must be set up again. Fails without leaving setup
    /// when nothing was added.
    pub fn end_setup(&mut self) -> Result<Arc<PartitionedTable>, Error> {
        if self.state != SetupState::InProgress {
            return Err(Error::SetupNotInProgress);
        }

        if self.raw.is_empty() {
            warn!("Impulse response table setup ended without entries");
            return Err(Error::EmptyTable);
        }

        let mut entries = HashMap::new();
        entries.try_reserve(self.raw.len())?;

        for (key, raw) in self.raw.iter() {
            let mut ir = self.partitioner.partition(raw.taps())?;
            ir.set_delay(raw.delay());
            entries.insert(*key, ir);
        }

        self.generation += 1;

        let table = Arc::new(PartitionedTable {
            generation: self.generation,
            sample_rate: self.sample_rate,
            block_len: self.partitioner.block_len(),
            ir_len: self.ir_len,
            entries,
            empty: PartitionedIr::empty(),
        });

        self.published.store(Some(Arc::clone(&table)));
        self.current = Some(Arc::clone(&table));
        self.state = SetupState::Ready;

        debug!(
            "Impulse response table ready: {} entries, {} partitions of {} samples",
            table.len(),
            table.subfilter_count(),
            table.block_len()
        );

        Ok(table)
    }

    /// Partitioned response for `key`.
    ///
    /// Returns the empty sentinel and logs a warning when the key is missing
    /// or the table is not ready.
    pub fn lookup(&self, key: &MeasurementKey) -> &PartitionedIr {
        match (self.state, self.current.as_ref()) {
            (SetupState::Ready, Some(table)) => table.lookup(key),
            _ => {
                warn!("Impulse response for {} requested before table is ready", key);
                &self.empty
            }
        }
    }

    /// Like [`lookup`](Self::lookup) but silent.
    pub fn get(&self, key: &MeasurementKey) -> Option<&PartitionedIr> {
        match self.state {
            SetupState::Ready => self.current.as_ref().and_then(|table| table.get(key)),
            _ => None,
        }
    }

    /// Raw response as it was added.
    pub fn raw(&self, key: &MeasurementKey) -> Option<&RawImpulseResponse> {
        self.raw.get(key)
    }

    /// Change the block length entries are partitioned for.
    ///
    /// A ready table goes through a full restart on its retained raw data
    /// and the new snapshot is returned. A table in setup partitions with
    /// the new length when the setup ends.
    pub fn set_block_len(
        &mut self,
        block_len: usize,
    ) -> Result<Option<Arc<PartitionedTable>>, Error> {
        self.partitioner = Partitioner::new(block_len)?;

        if self.state != SetupState::Ready {
            return Ok(None);
        }

        debug!("Repartitioning impulse response table for {} samples", block_len);

        let raw = std::mem::take(&mut self.raw);
        let distance = self.distance;

        self.begin_setup(self.ir_len)?;
        self.distance = distance;

        for (key, ir) in raw {
            self.add(key, ir)?;
        }

        self.end_setup().map(Some)
    }

    /// Change the sample rate. Measurements taken at the old rate are
    /// dropped and the table has to be loaded again.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> Result<(), Error> {
        self.sample_rate = validate_sample_rate(sample_rate)?;

        self.raw.clear();
        self.current = None;
        self.published.store(None);
        self.ir_len = 0;
        self.distance = None;
        self.state = SetupState::NotConfigured;

        Ok(())
    }

    /// Handle for the render thread.
    pub fn reader(&self) -> TableReader {
        TableReader {
            published: Arc::clone(&self.published),
        }
    }

    /// Snapshot of the current setup, only while ready.
    pub fn snapshot(&self) -> Option<Arc<PartitionedTable>> {
        self.current.clone()
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SetupState::Ready
    }

    /// Number of raw entries.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    pub fn block_len(&self) -> usize {
        self.partitioner.block_len()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn distance(&self) -> Option<f32> {
        self.distance
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for ImpulseResponseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImpulseResponseTable")
            .field("state", &self.state)
            .field("sample_rate", &self.sample_rate)
            .field("block_len", &self.block_len())
            .field("ir_len", &self.ir_len)
            .field("entries", &self.raw.len())
            .field("generation", &self.generation)
            .finish()
    }
}

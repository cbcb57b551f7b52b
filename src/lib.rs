//! # Binconv
//!
//! Real-time partitioned convolution for binaural rendering.
//!
//! The crate is split into the pieces a binaural audio engine needs every
//! block:
//!
//! - [`table`]: impulse response tables keyed by measurement direction or
//!   virtual speaker, partitioned once and published to the render thread.
//! - [`partition`]: splitting time domain responses into frequency domain
//!   sub-filters.
//! - [`upc`]: uniformly partitioned convolvers for direct sound (optionally
//!   remembering past responses) and for room reverb.
//! - [`delay`]: onset delay lines.
//! - [`render`]: a two ear renderer tying everything together.
//!
//! [`render`]: `crate::render`
//!
//! # Example
//!
//! ```
//! use binconv::render::Renderer;
//! use binconv::table::{Direction, Ear, ImpulseResponseTable, MeasurementKey, RawImpulseResponse};
//!
//! let mut table = ImpulseResponseTable::builder()
//!     .with_sample_rate(44100.0)
//!     .with_block_len(64)
//!     .build()
//!     .unwrap();
//!
//! // control thread: load measurements
//! table.begin_setup(256).unwrap();
//! for ear in [Ear::Left, Ear::Right] {
//!     let mut taps = vec![0.0; 256];
//!     taps[0] = 1.0;
//!     table
//!         .add(MeasurementKey::direction(0.0, 0.0, ear), RawImpulseResponse::new(taps))
//!         .unwrap();
//! }
//! table.end_setup().unwrap();
//!
//! // render thread: follow the published table
//! let mut render = Renderer::builder(table.reader()).build().unwrap();
//!
//! let input = vec![0.0; 256];
//! let mut left = vec![0.0; 256];
//! let mut right = vec![0.0; 256];
//!
//! // read_input()
//!
//! render
//!     .process_block(&input, Direction::new(0.0, 0.0), &mut left, &mut right)
//!     .unwrap();
//! ```

pub mod delay;
pub mod fft;
pub mod partition;
pub mod table;
pub mod upc;

#[cfg(feature = "render")]
pub mod render;

mod error;

pub use error::Error;

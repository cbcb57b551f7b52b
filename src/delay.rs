//! Integer sample delay applied to rendered ear signals.

use crate::upc::zeroed;
use crate::Error;

/// Fixed capacity delay line.
///
/// All memory is allocated in [`new`](Self::new); changing the delay later
/// never allocates, so it is safe to call from the render thread.
#[derive(Clone, Debug)]
pub struct DelayLine {
    buf: Box<[f32]>,
    delay: usize,
    wpos: usize,
}

impl DelayLine {
    /// Delay line able to hold delays of up to `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            buf: zeroed(capacity.saturating_add(1), 0.0)?,
            delay: 0,
            wpos: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Change the delay, clamped to [`capacity`](Self::capacity). Returns
    /// the delay actually in effect.
    pub fn set_delay(&mut self, delay: usize) -> usize {
        self.delay = delay.min(self.capacity());
        self.delay
    }

    pub fn next(&mut self, input: f32) -> f32 {
        let n = self.buf.len();

        self.buf[self.wpos] = input;
        let rpos = (self.wpos + n - self.delay) % n;
        let output = self.buf[rpos];

        self.wpos = (self.wpos + 1) % n;

        output
    }

    pub fn apply(&mut self, buf: &mut [f32]) {
        for sample in buf {
            *sample = self.next(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.buf.fill(0.0);
        self.wpos = 0;
    }
}

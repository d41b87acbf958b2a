//! Adaptive time-range splitting.
//!
//! A wide range is cut into slices that grow geometrically from the end of
//! the range toward its start, so the newest data is scanned in small
//! windows and older data in progressively wider ones. The last allowed
//! slice absorbs whatever range is left.
//!
//! ```text
//! start                                                       end
//!   |<------------- rest ------------->|<--4h-->|<-2h->|<1h>|
//! ```
//!
//! Slices are returned oldest first and tile `[start, end)` exactly.

use crate::config::{QueryConfig, nanos};
use crate::types::Selector;

/// Splitting parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSplitter {
    /// Width of the newest slice in nanoseconds.
    pub initial_interval: i64,
    /// Growth factor applied after every slice. Values below 1 act as 1.
    pub delta_factor: f64,
    /// Maximum number of slices. Zero acts as one.
    pub max_slices: usize,
}

impl TimeSplitter {
    /// Creates a splitter.
    pub fn new(initial_interval: i64, delta_factor: f64, max_slices: usize) -> Self {
        Self {
            initial_interval,
            delta_factor,
            max_slices,
        }
    }

    /// Creates a splitter from the configured split parameters.
    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(
            nanos(config.split_initial_interval),
            config.split_delta_factor,
            config.split_max_slices,
        )
    }

    /// Splits `sel` into narrowed copies, oldest first.
    pub fn split(&self, sel: &Selector) -> Vec<Selector> {
        split_selector(sel, self.initial_interval, self.delta_factor, self.max_slices)
    }
}

/// Splits `sel` into slices of geometrically growing width, oldest first.
///
/// An empty range yields no slices.
pub fn split_selector(
    sel: &Selector,
    initial_interval: i64,
    delta_factor: f64,
    max_slices: usize,
) -> Vec<Selector> {
    let factor = if delta_factor.is_nan() || delta_factor < 1.0 {
        1.0
    } else {
        delta_factor
    };
    let max_slices = max_slices.max(1);

    let mut slices = Vec::new();
    let mut interval = initial_interval;
    let mut end = sel.end;
    while end > sel.start {
        let mut start = if interval > 0 {
            end.saturating_sub(interval)
        } else {
            sel.start
        };
        interval = grow(interval, factor);
        if start < sel.start || slices.len() + 1 >= max_slices {
            start = sel.start;
        }
        slices.push(sel.with_range(start, end));
        end = start;
    }
    slices.reverse();
    slices
}

fn grow(interval: i64, factor: f64) -> i64 {
    let grown = interval as f64 * factor;
    if grown >= i64::MAX as f64 {
        i64::MAX
    } else {
        grown as i64
    }
}

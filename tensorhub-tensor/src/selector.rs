use std::fmt::{Display, Formatter};
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use tensorhub_error::{HubResult, hub_bail};

/// Selection along one axis, with Python-style negative indices and open bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// A single position. The axis is dropped from the result.
    Index(i64),
    /// A half-open range. Missing bounds mean the start or end of the axis.
    Range(Option<i64>, Option<i64>),
}

/// A [`Selector`] normalized against a concrete axis extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisSelection {
    /// A single position
    Index(usize),
    /// A half-open range of positions
    Range(Range<usize>),
}

impl AxisSelection {
    /// The positions covered
    pub fn range(&self) -> Range<usize> {
        match self {
            AxisSelection::Index(i) => *i..*i + 1,
            AxisSelection::Range(r) => r.clone(),
        }
    }

    /// Whether the axis survives in the result
    pub fn keeps_axis(&self) -> bool {
        matches!(self, AxisSelection::Range(_))
    }
}

impl Selector {
    /// Every position of the axis.
    pub const FULL: Selector = Selector::Range(None, None);

    /// Whether this selects the whole axis without naming either bound
    pub fn is_full(&self) -> bool {
        matches!(self, Selector::Range(None, None))
    }

    /// Normalize against `extent`. Indices and bounds outside the axis fail with `OutOfBounds`.
    pub fn resolve_strict(&self, extent: usize) -> HubResult<AxisSelection> {
        match *self {
            Selector::Index(i) => {
                let idx = normalize(i, extent)?;
                if idx >= extent {
                    hub_bail!(OutOfBounds: idx, 0, extent);
                }
                Ok(AxisSelection::Index(idx))
            }
            Selector::Range(start, stop) => {
                let start = start.map_or(Ok(0), |s| normalize(s, extent))?;
                let stop = stop.map_or(Ok(extent), |s| normalize(s, extent))?;
                if stop > extent {
                    hub_bail!(OutOfBounds: stop, 0, extent);
                }
                if start > stop {
                    hub_bail!(OutOfBounds: start, 0, stop);
                }
                Ok(AxisSelection::Range(start..stop))
            }
        }
    }

    /// Normalize against `extent`, clamping range bounds into the axis like Python slicing.
    /// Indices stay strict.
    pub fn resolve_clamped(&self, extent: usize) -> HubResult<AxisSelection> {
        match *self {
            Selector::Index(_) => self.resolve_strict(extent),
            Selector::Range(start, stop) => {
                let clamp = |bound: i64| -> HubResult<usize> {
                    let extent_i = i64::try_from(extent)?;
                    let value = if bound < 0 { (bound + extent_i).max(0) } else { bound.min(extent_i) };
                    Ok(usize::try_from(value)?)
                };
                let start = start.map_or(Ok(0), clamp)?;
                let stop = stop.map_or(Ok(extent), clamp)?;
                Ok(AxisSelection::Range(start..stop.max(start)))
            }
        }
    }
}

/// Map a possibly negative position onto `0..=extent`.
fn normalize(index: i64, extent: usize) -> HubResult<usize> {
    let extent_i = i64::try_from(extent)?;
    let normalized = if index < 0 { index + extent_i } else { index };
    if normalized < 0 {
        hub_bail!(
            "index {index} is out of bounds for an axis of length {extent}"
        );
    }
    Ok(usize::try_from(normalized)?)
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Index(i) => write!(f, "{i}"),
            Selector::Range(start, stop) => {
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                write!(f, ":")?;
                if let Some(stop) = stop {
                    write!(f, "{stop}")?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! index_from {
    ($($T:ty),*) => {
        $(
            impl From<$T> for Selector {
                fn from(value: $T) -> Self {
                    Selector::Index(i64::from(value))
                }
            }

            impl From<Range<$T>> for Selector {
                fn from(value: Range<$T>) -> Self {
                    Selector::Range(Some(i64::from(value.start)), Some(i64::from(value.end)))
                }
            }

            impl From<RangeFrom<$T>> for Selector {
                fn from(value: RangeFrom<$T>) -> Self {
                    Selector::Range(Some(i64::from(value.start)), None)
                }
            }

            impl From<RangeTo<$T>> for Selector {
                fn from(value: RangeTo<$T>) -> Self {
                    Selector::Range(None, Some(i64::from(value.end)))
                }
            }
        )*
    };
}

index_from!(i8, i16, i32, i64, u8, u16, u32);

#[allow(clippy::cast_possible_wrap)]
impl From<usize> for Selector {
    fn from(value: usize) -> Self {
        Selector::Index(value as i64)
    }
}

#[allow(clippy::cast_possible_wrap)]
impl From<Range<usize>> for Selector {
    fn from(value: Range<usize>) -> Self {
        Selector::Range(Some(value.start as i64), Some(value.end as i64))
    }
}

#[allow(clippy::cast_possible_wrap)]
impl From<RangeFrom<usize>> for Selector {
    fn from(value: RangeFrom<usize>) -> Self {
        Selector::Range(Some(value.start as i64), None)
    }
}

#[allow(clippy::cast_possible_wrap)]
impl From<RangeTo<usize>> for Selector {
    fn from(value: RangeTo<usize>) -> Self {
        Selector::Range(None, Some(value.end as i64))
    }
}

impl From<RangeFull> for Selector {
    fn from(_: RangeFull) -> Self {
        Selector::FULL
    }
}

//! Publication-wide progression index.
//!
//! Each reading-order resource gets a weight (byte length by default) and
//! occupies the band `[start, start + weight)` of the cumulative weight line.
//! `total_progression` is the position on that line divided by the total
//! weight, which keeps progress bars and search-hit ranking independent of
//! the current viewport.

use core::fmt;

use crate::href::resolve_href_index;
use crate::locator::normalize_progression;
use crate::publication::ResourceRef;

/// Relative share of the resource's weight given to zero-cost resources.
const MIN_WEIGHT_RATIO: f64 = 1e-6;
/// Positions this close (relative to the total weight) to the next band start
/// resolve to that resource's start.
const BOUNDARY_SNAP_RATIO: f64 = 1e-12;

/// Weight function for reading-order resources.
pub trait ResourceCost {
    /// Non-negative cost of `resource`. Non-finite or negative values count as zero.
    fn cost(&self, resource: &ResourceRef) -> f64;
}

/// Weight resources by their byte length.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByteLengthCost;

impl ResourceCost for ByteLengthCost {
    fn cost(&self, resource: &ResourceRef) -> f64 {
        resource.byte_len as f64
    }
}

/// Give every resource the same weight.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformCost;

impl ResourceCost for UniformCost {
    fn cost(&self, _resource: &ResourceRef) -> f64 {
        1.0
    }
}

impl<F> ResourceCost for F
where
    F: Fn(&ResourceRef) -> f64,
{
    fn cost(&self, resource: &ResourceRef) -> f64 {
        self(resource)
    }
}

/// Position index failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PositionIndexError {
    /// The reading order has no resources.
    EmptyPublication,
    /// The href is not part of the reading order.
    UnknownResource(String),
}

impl fmt::Display for PositionIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPublication => write!(f, "publication reading order is empty"),
            Self::UnknownResource(href) => write!(f, "resource not in reading order: {}", href),
        }
    }
}

impl std::error::Error for PositionIndexError {}

/// Weight band of one reading-order resource.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionIndexEntry {
    pub href: String,
    pub media_type: String,
    /// Cumulative weight of all preceding resources.
    pub start: f64,
    /// Resource weight (always > 0).
    pub weight: f64,
}

impl PositionIndexEntry {
    fn end(&self) -> f64 {
        self.start + self.weight
    }
}

/// Cached cumulative-weight boundaries over a reading order.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionIndex {
    entries: Vec<PositionIndexEntry>,
    total_weight: f64,
}

impl PositionIndex {
    /// Build an index weighting resources by byte length.
    pub fn build(reading_order: &[ResourceRef]) -> Result<Self, PositionIndexError> {
        Self::build_with_cost(reading_order, &ByteLengthCost)
    }

    /// Build an index with a custom cost function.
    ///
    /// Zero-cost resources receive a small epsilon weight so they remain
    /// addressable.
    pub fn build_with_cost(
        reading_order: &[ResourceRef],
        cost: &dyn ResourceCost,
    ) -> Result<Self, PositionIndexError> {
        if reading_order.is_empty() {
            return Err(PositionIndexError::EmptyPublication);
        }

        let raw: Vec<f64> = reading_order
            .iter()
            .map(|resource| {
                let value = cost.cost(resource);
                if value.is_finite() && value > 0.0 {
                    value
                } else {
                    0.0
                }
            })
            .collect();
        let raw_total: f64 = raw.iter().sum();
        let min_weight = if raw_total > 0.0 {
            raw_total * MIN_WEIGHT_RATIO
        } else {
            1.0
        };
        let costless = raw.iter().filter(|value| **value <= 0.0).count();
        if costless > 0 {
            log::debug!(
                "{} of {} resources carry no cost; weighting them at {}",
                costless,
                reading_order.len(),
                min_weight
            );
        }

        let mut entries = Vec::with_capacity(reading_order.len());
        let mut start = 0.0f64;
        for (resource, raw_weight) in reading_order.iter().zip(raw) {
            let weight = raw_weight.max(min_weight);
            entries.push(PositionIndexEntry {
                href: resource.href.clone(),
                media_type: resource.media_type.clone(),
                start,
                weight,
            });
            start += weight;
        }

        Ok(Self {
            entries,
            total_weight: start,
        })
    }

    /// Resource bands in reading order.
    pub fn entries(&self) -> &[PositionIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; empty reading orders are rejected at build time.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Reading-order index of `href` (fragment and path spelling tolerant).
    pub fn resource_index(&self, href: &str) -> Option<usize> {
        resolve_href_index(self.entries.iter().map(|entry| entry.href.as_str()), href)
    }

    /// Publication-wide progression for a position inside `href`.
    pub fn progression_for(
        &self,
        href: &str,
        chapter_progression: f64,
    ) -> Result<f64, PositionIndexError> {
        let index = self
            .resource_index(href)
            .ok_or_else(|| PositionIndexError::UnknownResource(href.to_string()))?;
        self.progression_for_index(index, chapter_progression)
            .ok_or_else(|| PositionIndexError::UnknownResource(href.to_string()))
    }

    /// Publication-wide progression for a position inside resource `index`.
    pub fn progression_for_index(&self, index: usize, chapter_progression: f64) -> Option<f64> {
        let entry = self.entries.get(index)?;
        let offset = entry.start + normalize_progression(chapter_progression) * entry.weight;
        Some(normalize_progression(offset / self.total_weight))
    }

    /// Inverse of [`PositionIndex::progression_for`].
    ///
    /// Input outside `[0, 1]` is clamped. A position exactly on a band
    /// boundary resolves to the start of the later resource.
    pub fn resource_for(&self, total_progression: f64) -> (&str, f64) {
        let (index, chapter_progression) = self.resource_index_for(total_progression);
        (self.entries[index].href.as_str(), chapter_progression)
    }

    /// Like [`PositionIndex::resource_for`], returning the reading-order index.
    pub fn resource_index_for(&self, total_progression: f64) -> (usize, f64) {
        let target = normalize_progression(total_progression) * self.total_weight;
        let upper = self.entries.partition_point(|entry| entry.start <= target);
        let mut index = upper.saturating_sub(1);

        let snap = self.total_weight * BOUNDARY_SNAP_RATIO;
        if let Some(next) = self.entries.get(index + 1) {
            if next.start - target <= snap {
                index += 1;
            }
        }

        let entry = &self.entries[index];
        if target >= entry.end() {
            return (index, 1.0);
        }
        let chapter_progression = normalize_progression((target - entry.start) / entry.weight);
        (index, chapter_progression)
    }
}

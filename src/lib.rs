//! Reading-position primitives for paginated e-book readers.
//!
//! `pagemark` holds the renderer-agnostic half of a reading-position bridge:
//! immutable [`Locator`] values, the [`ViewportConfig`] that pagination is
//! keyed on, the publication-wide [`PositionIndex`], and the interfaces a
//! container parser implements to hand over a reading order. Pagination,
//! session persistence and the host-facing bridge live in `pagemark-render`.
//!
//! # Usage
//!
//! ```rust
//! use pagemark::{PositionIndex, ResourceRef};
//!
//! # fn example() -> Result<(), pagemark::PositionIndexError> {
//! let order = [
//!     ResourceRef::new("text/ch1.xhtml", "application/xhtml+xml", 1000),
//!     ResourceRef::new("text/ch2.xhtml", "application/xhtml+xml", 3000),
//! ];
//! let index = PositionIndex::build(&order)?;
//! let total = index.progression_for("text/ch2.xhtml", 0.5)?;
//! assert!((total - 0.625).abs() < 1e-9);
//! assert_eq!(index.resource_for(0.25), ("text/ch2.xhtml", 0.0));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![cfg_attr(
    not(test),
    deny(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

mod digest;
pub mod href;
pub mod locator;
pub mod navigation;
pub mod position;
pub mod publication;

pub use locator::{
    normalize_progression, Direction, LayoutProfileId, Locator, LocatorJsonError,
    ReadingProgression, ScreenEdge, Theme, ViewportConfig, ViewportError, ViewportPosition,
};
pub use navigation::{NavPoint, Navigation};
pub use position::{
    ByteLengthCost, PositionIndex, PositionIndexEntry, PositionIndexError, ResourceCost,
    UniformCost,
};
pub use publication::{
    ContainerError, ContainerParser, MemoryContainer, MemoryPublication, Publication,
    PublicationHandle, PublicationId, PublicationIdentity, PublicationMetadata, ResourceRef,
};

//! Pagination, session persistence, and the host bridge for `pagemark`.

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

mod bridge;
mod markup;
mod measure;
mod pagination;
mod session;
mod store;

pub use bridge::{Bridge, BridgeError, BridgeOptions, OpenError, OpenErrorReason};
pub use markup::anchor_offset;
pub use measure::{FlowMetrics, LayoutError, LayoutMeasurer, TextFlowMeasurer};
pub use pagination::{
    CancelToken, NeverCancel, NoPageMapStore, PageMap, PageMapCache, PageMapKey, PageMapStore,
    PaginationDiagnostic, PaginationEngine, PaginationError, ResourceLayoutState,
};
pub use session::{
    decode_session_record, encode_session_record, now_ms, KvPageMapStore, Session,
    SessionRecordError, SessionStore, SessionStoreError,
};
pub use store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StoreError};

//! # Fieldbook Server
//!
//! A local, disk-persisted, real-time research journal: producing code
//! pushes structured visual artifacts (tables, charts, images, text,
//! decision forms) to a browser tab, optionally blocks until a reviewer
//! responds, and everything is durably recorded as a replayable,
//! exportable study.
//!
//! Components:
//! - `store`: durable, paged-access artifact storage
//! - `redact`: heuristic redaction of identifier-like tabular columns
//! - `registry`: the ordered, journaled card index per study
//! - `decision`: the blocking push-and-wait freeze mechanic
//! - `selection`: last-write-wins viewer selections
//! - `study`: study lifecycle and persistence layout
//! - `export`: self-contained HTML and structured bundle exports
//! - `adapt`: ordered typed adapters from pushed values to payloads
//! - `api`: axum HTTP/SSE surface
//! - `state`: the explicit server context tying it together

pub mod adapt;
pub mod api;
pub mod config;
pub mod decision;
pub mod export;
pub mod redact;
pub mod registry;
pub mod selection;
pub mod state;
pub mod store;
pub mod study;

pub use config::Config;
pub use state::ServerContext;

//! # Fieldbook Common Library
//!
//! Shared code for the Fieldbook journal server and client:
//! - Data model (cards, artifacts, studies, selections)
//! - Event types (`JournalEvent`, `DisplayEvent`) and `EventBus`
//! - API request/response types for the command surface
//! - Common error type

pub mod api;
pub mod error;
pub mod events;
pub mod model;

pub use error::{Error, Result};

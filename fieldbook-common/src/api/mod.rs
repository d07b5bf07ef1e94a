//! API types shared between the server and the producing-process client

pub mod types;

pub use types::{
    CommandRequest, ErrorResponse, PushRequest, PushResponse, SelectionResponse,
    StatusResponse,
};

//! HTTP middleware for the server.

pub mod request_id;

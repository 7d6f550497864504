//! `cronward-gateway` builds the `cronward` daemon. It wires config into the
//! scheduler loop and hosts the worker entrypoints and the HTTP status API.

pub mod app;
pub mod daemon;
pub mod http;
pub mod shutdown;
pub mod worker;

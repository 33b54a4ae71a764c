//! Authorization service client.

pub mod http;

//! Core trait definitions

mod dialer;

pub use dialer::{BoxedStream, Dialer, DuplexStream, TcpDialer};

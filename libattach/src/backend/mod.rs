//! Provider backend implementations.
//!
//! Each backend module provides a concrete type that implements
//! [`VolumeProvider`](crate::provider::VolumeProvider).

pub mod memory;

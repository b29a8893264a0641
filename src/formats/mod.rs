//! Container format decoders.

pub mod pe;
pub mod region;
pub mod zip;

//! Infrastructure shared by the cache: block hashing and lock primitives

pub mod hash;
pub mod lwlock;

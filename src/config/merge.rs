//! Config composition: defaults policy and the merge service.

pub mod policy;
pub mod service;

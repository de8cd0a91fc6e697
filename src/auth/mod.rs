pub(crate) mod extractors;
pub mod repo;
pub mod verifier;

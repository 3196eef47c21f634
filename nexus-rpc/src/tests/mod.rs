//! Test module for nexus-rpc
//!
//! End-to-end tests that drive procedures through the [`Caller`](crate::Caller),
//! plus property-based tests using proptest for the middleware chain.

#[cfg(test)]
pub mod caller_tests;


#[cfg(test)]
pub mod parser_tests;

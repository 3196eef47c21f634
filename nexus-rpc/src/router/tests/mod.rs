//! Router tests

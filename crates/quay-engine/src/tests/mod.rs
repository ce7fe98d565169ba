//! Tests for the quay-engine crate.

mod helpers;

mod placement;

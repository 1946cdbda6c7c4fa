//! Small helpers: year-range validation and atomic file writes.

pub(crate) mod date;
pub(crate) mod fs;

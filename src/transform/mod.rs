//! Turns Crossref record fragments into table cell text.

pub(crate) mod work;

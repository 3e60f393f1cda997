//! On-disk layout: the gzip header and its EXTRA field.

pub mod extra;
pub mod header;

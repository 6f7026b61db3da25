//! Pure domain logic: the grid description and its resolved address tables.

pub mod grid;

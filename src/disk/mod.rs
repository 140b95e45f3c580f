//! Storage topology model

pub mod devicegraph;
pub mod size;

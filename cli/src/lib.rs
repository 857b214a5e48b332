//! chartscan CLI - installs a chart and reports the layer sizes of the
//! images its manifest references.

pub mod commands;

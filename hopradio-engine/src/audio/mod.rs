//! Audio pipeline: decoding, device output, processing graph, analysis.

pub mod analyzer;
pub mod backend;
pub mod decode;
pub mod dsp;
pub mod graph;
pub mod output;

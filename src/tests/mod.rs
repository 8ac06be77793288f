// Test modules

mod batch_progressive_test;
pub mod common;
mod pipeline_end_to_end_test;

pub mod pipeline;
pub mod sink;
pub mod source;

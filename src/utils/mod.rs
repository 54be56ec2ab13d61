pub mod json;
pub mod timestamp;

pub mod annotation;
pub mod label;

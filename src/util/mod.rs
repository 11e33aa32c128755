pub mod exponential_backoff;
pub mod registry;
pub mod safe_converter;

pub mod rolling_average;
pub mod safe_converter;

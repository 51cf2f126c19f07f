pub mod aggregators;
pub mod quantile_sketch;

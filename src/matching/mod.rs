pub mod geo;
pub mod pairs;
pub mod suburbs;

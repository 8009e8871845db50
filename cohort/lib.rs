#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod frame;
pub mod load;
pub mod macro_features;
pub mod pipeline;
pub mod plots;
pub mod preprocess;
pub mod remote;
pub mod stats;
pub mod train;

#[path = "../forest/lib.rs"]
pub mod forest;

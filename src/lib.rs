extern crate lazy_static;

pub mod error;
pub mod raster;
pub mod grid;
pub mod kernel;
pub mod morphology;
pub mod cost_distance;
pub mod components;
pub mod utils;
pub mod support;
pub mod imagery;
pub mod network;
pub mod watermask;
pub mod river;
pub mod banks;
pub mod noise;
pub mod epoch;
pub mod migration;
pub mod aggregate;
pub mod sink;
pub mod config;
pub mod pipeline;
pub mod batch;

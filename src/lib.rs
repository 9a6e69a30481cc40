pub mod alexnet;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod device;
pub mod error;
pub mod model;
pub mod optim;
pub mod resnet;
pub mod train;

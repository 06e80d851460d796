#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;

pub mod browser_controller;
pub mod crawler;
pub mod extractor;
pub mod limits;
pub mod runner;
pub mod types;
pub mod utils;

#[macro_use]
extern crate serde_derive;
extern crate serde;

pub mod app;
pub mod com;
pub mod record;

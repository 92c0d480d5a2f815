#[macro_use]
extern crate tracing;
#[macro_use]
extern crate serde;
extern crate snafu;

pub mod core;
pub mod eventing;
pub mod logger;
pub mod scan;
pub mod subsys;

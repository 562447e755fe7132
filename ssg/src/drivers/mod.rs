mod driver;
mod driver_config;
mod models;
mod window;

pub use driver::*;
pub use driver_config::*;
pub use models::*;
pub use window::*;

pub mod controller;
pub mod machine;
mod reconcilers;

pub use controller::run;

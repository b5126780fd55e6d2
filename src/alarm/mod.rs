pub mod key;
pub mod model;
pub mod runtime;

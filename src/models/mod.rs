pub mod artifact;
pub mod common;
pub mod request;
pub mod run;

pub use artifact::*;
pub use common::*;
pub use request::*;
pub use run::*;

mod book;
mod common;
mod user;

pub use book::*;
pub use common::*;
pub use user::*;

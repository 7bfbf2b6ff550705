pub mod field;
pub mod group;
pub mod project;
pub mod user;

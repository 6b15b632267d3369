pub mod retention;
pub mod sorting;
pub mod store;

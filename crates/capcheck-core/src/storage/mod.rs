pub mod schema;
pub mod store;
pub mod summary;

pub use store::Store;

pub mod dir_store;
pub mod export;
pub mod gateway;
pub mod models;
pub mod store;

pub use dir_store::*;
pub use export::*;
pub use gateway::*;
pub use models::*;
pub use store::*;

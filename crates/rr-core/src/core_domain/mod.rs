mod corpus;
mod dedup;
mod error;
mod flat_codec;
mod position;
mod schema;
mod turn_keyed_codec;
mod types;

pub use corpus::*;
pub use dedup::*;
pub use error::*;
pub use position::*;
pub use schema::*;
pub use types::*;

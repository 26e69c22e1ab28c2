pub(crate) mod common;
pub mod health;
pub mod models;
pub mod normalize;
pub mod v1;
pub mod v2;

pub use common::RequestMeta;

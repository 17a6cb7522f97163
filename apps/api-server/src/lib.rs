pub mod error;
pub mod routes;
pub mod settings;
pub mod standalone;
pub mod store;

pub mod exports {
    pub use crate::standalone;
}

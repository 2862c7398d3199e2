//! `skyshard_shared`
//!
//! Protocol and data model shared by the server and its test clients.
//!
//! Design goals:
//! - Deterministic where practical (seedable weather, stable orderings).
//! - Clear separation of concerns (wire ops, schema, transport, world data).
//! - Traits at the transport seam for dependency injection.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod items;
pub mod math;
pub mod net;
pub mod schema;
pub mod transport;
pub mod weather;
pub mod world;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::schema::{ComponentData, ComponentId, ComponentKind, ComponentUpdate};
    pub use crate::transport::{Transport, TransportEvent};
}

//! Connection to the mesh radio gateway.

mod handler;
mod link;
mod protocol;

pub use handler::{handle_gateway_socket, spawn_inbound_worker, InboundText};
pub use link::MeshLink;

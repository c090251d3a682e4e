//! Discord side of the bridge: REST client, gateway session, event handling.
//!
//! Slash commands (`/send`, `/advert`, `/bridge`) are registered out of band;
//! the bridge only answers them.

mod api;
mod events;
mod gateway;
mod types;

pub use api::DiscordApi;
pub use gateway::run;

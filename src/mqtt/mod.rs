pub mod events;
pub mod state_message;
pub mod supervisor;

pub mod events;
pub mod groups;
pub mod messages;

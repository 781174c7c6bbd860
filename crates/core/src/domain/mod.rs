pub mod calculation;
pub mod conversation;
pub mod question;
pub mod sector;
pub mod workflow;

pub mod conversations;
pub mod messages;
pub mod status;
pub mod stream;
pub mod tree;

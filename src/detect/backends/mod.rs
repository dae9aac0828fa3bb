pub mod command;
pub mod stub;

pub use command::CommandBackend;
pub use stub::StubBackend;

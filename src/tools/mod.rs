pub mod command_builder;
pub mod parameter;

pub use command_builder::CommandBuilder;
pub use parameter::{Parameter, ParameterKind};

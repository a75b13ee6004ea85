mod builder;
mod container;
mod injectable;

pub use builder::ContainerBuilder;
pub use container::{Container, Lifetime};
pub use injectable::Injectable;

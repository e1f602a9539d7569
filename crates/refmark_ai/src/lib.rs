pub mod align;
pub mod flow;
pub mod provider;

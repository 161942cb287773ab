mod ids;
pub use ids::*;
mod base;
pub use base::*;
mod tyspec;
pub use tyspec::*;
mod info;
pub use info::*;
mod registry;
pub use registry::*;
pub mod layout;
mod ast;
pub use ast::*;
mod scope;
pub use scope::*;
mod error;
pub use error::*;

mod registry;
pub use registry::*;
mod concepts;
pub use concepts::*;
mod subst;
pub use subst::*;
mod deduce;
pub use deduce::*;
mod typeck;
mod consteval;
pub use consteval::fold_values;
mod inst_fn;
mod inst_class;

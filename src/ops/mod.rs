// Operation enums and gradient functions
pub mod binary;
pub mod conv;
pub mod movement;
pub mod reduce;
pub mod unary;

pub use binary::{BinaryGradFn, BinaryOp};
pub use conv::{Conv2dGradFn, Conv2dParams};
pub use movement::{CatGradFn, MovementGradFn, MovementOp, cat};
pub use reduce::{ReduceGradFn, ReduceOp};
pub use unary::{UnaryGradFn, UnaryOp};

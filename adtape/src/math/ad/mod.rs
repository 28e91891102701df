pub mod dual;
pub mod functor;
pub mod node;
pub mod tape;
pub mod var;

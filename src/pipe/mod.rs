//! The tube pipeline and the fiber that drives packets through it.
//!
//! A [`Tubeline`] is an arena of tubes addressed by [`TubeRef`]. Lines are
//! templates: every concurrent invocation runs on its own copy, taken from a
//! [`TubelinePool`] and driven by a [`Fiber`].

pub mod assembler;
pub mod completion;
pub mod fiber;
pub mod tube;

pub use assembler::{
    ClientAssemblerContext, ServerAssemblerContext, StandaloneTubelineAssembler, TubeFactory,
};
pub use completion::{completion_channel, Completion, Suspension};
pub use fiber::{Fiber, FiberState};
pub use tube::{FnTube, NextAction, Tube, TubeCloner, TubeRef, Tubeline, TubelinePool};

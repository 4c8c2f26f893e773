//! The ku compilation session: module loading, dependency ordering, and
//! the resolve/infer pipeline.

mod compiler;

pub use compiler::{Analysis, Session};

pub use ku_ast as ast;
pub use ku_diag as diag;
pub use ku_infer as infer;
pub use ku_mangle as mangle;
pub use ku_resolve as resolve;
pub use ku_types as types;

#[cfg(test)]
mod compiler_tests;

//! Verimath Backend - interchangeable computation units
//!
//! - `Backend`: the capability-query contract every solver implements
//! - `BackendRegistry`: read-only, ordered dispatch table built at startup
//! - `SymbolicBackend` / `NumericBackend`: the built-in solver family
//! - `ReproductionBackend`: adapter for an external build collaborator
//!
//! # Example
//!
//! ```rust,ignore
//! use verimath_backend::prelude::*;
//!
//! # async fn example() -> Result<(), BackendError> {
//! let registry = BackendRegistry::with_defaults();
//! let request = BackendRequest::new(Method::Solve)
//!     .with_statement(verimath_expr::parse_statement("x^2 = 4")?)
//!     .with_variable("x");
//! let backend = registry.select(&request, &[]).expect("symbolic accepts");
//! println!("{}", backend.execute(&request).await?);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod build;
pub mod error;
mod linalg;
pub mod numeric;
pub mod registry;
pub mod symbolic;
pub mod value;

pub use backend::{Backend, BackendRequest, Method};
pub use build::{generate_check_program, BuildCollaborator, BuildReport, BuildTask, ReproductionBackend};
pub use error::BackendError;
pub use numeric::NumericBackend;
pub use registry::{BackendRegistry, CapabilityTable};
pub use symbolic::SymbolicBackend;
pub use value::{Sense, Value, ValueKind};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with backends
    pub use crate::{
        Backend, BackendError, BackendRegistry, BackendRequest, Method, NumericBackend, Sense,
        SymbolicBackend, Value, ValueKind,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

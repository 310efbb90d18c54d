//! Tether Build - incremental compile cache for intercepted functions
//!
//! Provides:
//! - [`BuildEngine`]: one cached, incrementally rebuilt artifact per function
//! - [`BuildOptions`]: format-dependent defaults merged with bundling hints
//! - The [`Compiler`] / [`CompilerContext`] seam and the external
//!   [`CommandCompiler`]
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_build::prelude::*;
//!
//! let engine = BuildEngine::new(catalog, Arc::new(CommandCompiler::esbuild(&root)), &config);
//! let artifact = engine.get_artifact(&function_id).await?;
//! // after a source change
//! engine.mark_all_stale();
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod compiler;
pub mod engine;
pub mod error;
pub mod options;

pub use compiler::{BuildOutput, CommandCompiler, Compiler, CompilerContext};
pub use engine::{BuildEngine, BuildStats};
pub use error::BuildError;
pub use options::{resolve_format, BuildOptions, SourceMap};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the build engine
    pub use crate::{BuildEngine, BuildError, BuildOptions, CommandCompiler, Compiler};
}

//! Block-structured code generation
//!
//! Lowers a typed, fully resolved HIR into MIR: functions made of basic
//! blocks with explicit terminators, phi nodes, landing pads and invokes.
//!
//! ```rust,ignore
//! use blockgen::{lower_module, LoweringConfig};
//!
//! let module = lower_module(&files, &decls, &LoweringConfig::development())?;
//! println!("{}", blockgen::ir::dump::dump_module(&module));
//! ```

pub mod config;
pub mod error;
pub mod hir;
pub mod ir;
pub mod logging;
pub mod lowering;

pub use config::LoweringConfig;
pub use error::{LoweringError, LoweringResult};
pub use lowering::{lower_module, lower_module_with, verify_function};

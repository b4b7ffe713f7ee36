//! Pipeline stages for PDF-to-PNG conversion.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the engine in [`crate::engine`] stays a thin composition.
//!
//! ## Data Flow
//!
//! ```text
//! request ──▶ command ──▶ process ──▶ collect
//!             (argv)      (pdftoppm)   (glob)
//! ```
//!
//! 1. [`command`] — validate the format and build the ordered argument list
//! 2. [`process`] — spawn pdftoppm in its own process group and wait, killing
//!    the group if the context is cancelled or times out
//! 3. [`collect`] — glob the page images pdftoppm left on disk

pub mod collect;
pub mod command;
pub mod process;

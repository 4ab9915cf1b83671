// registrar-sdk: Foundation layer for the GitLab Runner registrar.
// This crate has ZERO dependencies on other registrar crates and provides
// process, trace and file utilities used throughout the workspace.

pub mod io_util;
pub mod process_invoker;
pub mod string_util;
pub mod trace;
pub mod which_util;

// Re-export commonly used items at crate root
pub use io_util::IOUtil;
pub use process_invoker::{ProcessInvoker, ProcessOutput};
pub use string_util::StringUtil;
pub use trace::TraceWriter;
pub use which_util::WhichUtil;

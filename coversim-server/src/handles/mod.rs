mod covering_handle;
mod sse_handle;
mod webhook_handle;

pub use covering_handle::*;
pub use sse_handle::*;
pub use webhook_handle::*;

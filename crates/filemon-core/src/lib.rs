//! File-access monitor for the filemon workspace.
//!
//! A [`lifecycle::Filemon`] owns a pool of monitor handles. Each handle is
//! bound to one target process and one output sink; operations performed
//! by the target and its descendants are intercepted through an
//! [`intercept::InterceptHost`] and appended to the sink as filemon v4
//! records. [`parse`] reads those logs back.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod attach;
pub mod dispatch;
pub mod fs;
pub mod handle;
pub mod intercept;
pub mod lifecycle;
pub mod parse;
pub mod pool;
pub mod process;
pub mod record;
pub mod sink;

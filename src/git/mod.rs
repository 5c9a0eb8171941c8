//! Git plumbing: remote URL parsing and subprocess invocation.

mod invoker;
mod ssh;
mod url;

pub use invoker::GitInvoker;
pub use ssh::ssh_command;
pub use url::{RemoteUrl, UrlScheme};

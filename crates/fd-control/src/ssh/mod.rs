//! SSH subprocess execution
//!
//! Everything that talks to a remote host goes through the [`SshRunner`]
//! trait so the lifecycle and probe logic can be driven by fakes in tests.

mod command;
mod process;
mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use command::{resolve_config_invocation, ReverseForward, SshCommandBuilder, SshInvocation};
pub use process::ChildProcess;
pub use runner::{
    run_to_completion, CommandOutput, ExitInfo, OutputLine, OutputStream, ProcessRunner,
    RunnerError, SshProcess, SshRunner,
};

//! The other out-of-scope external collaborator: launching a child
//! process and passing it a handle/identifier argument. This module
//! provides a thin default implementation over `std::process::Command`
//! so the bootstrap demo binaries are runnable; application code may
//! supply its own `spawn` contract instead.

use ipc_support::error::{IpcError, IpcResult};
use std::process::{Child, Command};

/// The literal token the spawning process substitutes with the current
/// `initial_pipe_id` (§6 spawn-argument convention).
pub const PIPE_ID_TOKEN: &str = "PIPE_ID";

/// Builds the argument list for a spawned child: replaces every literal
/// `"PIPE_ID"` token with `pipe_id`, or appends `pipe_id` as the sole
/// argument if none of the supplied arguments contain the token.
pub fn substitute_pipe_id(args: &[String], pipe_id: &str) -> Vec<String> {
    if args.iter().any(|a| a == PIPE_ID_TOKEN) {
        args.iter()
            .map(|a| if a == PIPE_ID_TOKEN { pipe_id.to_string() } else { a.clone() })
            .collect()
    } else if args.is_empty() {
        vec![pipe_id.to_string()]
    } else {
        args.to_vec()
    }
}

/// Spawns `path` with `args` (after substituting the pipe id token),
/// returning the child handle. Callers observe process exit via
/// [`wait_for_exit`].
pub fn spawn(path: &str, args: &[String], pipe_id: &str) -> IpcResult<Child> {
    let resolved = substitute_pipe_id(args, pipe_id);
    Command::new(path)
        .args(&resolved)
        .spawn()
        .map_err(|err| IpcError::Os(format!("failed to spawn `{path}`: {err}")))
}

/// Blocks until the child exits, returning its exit status. Mirrors the
/// `spawn(path, args) → process handle` contract's `exited` notification.
pub fn wait_for_exit(mut child: Child) -> IpcResult<std::process::ExitStatus> {
    child.wait().map_err(|err| IpcError::Os(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_pipe_id_token_in_place() {
        let args = vec!["--pipe".to_string(), "PIPE_ID".to_string()];
        let resolved = substitute_pipe_id(&args, "ipc-anon-abc");
        assert_eq!(resolved, vec!["--pipe", "ipc-anon-abc"]);
    }

    #[test]
    fn appends_pipe_id_when_no_args_given() {
        let resolved = substitute_pipe_id(&[], "ipc-anon-abc");
        assert_eq!(resolved, vec!["ipc-anon-abc"]);
    }

    #[test]
    fn leaves_args_untouched_when_token_absent_and_args_nonempty() {
        let args = vec!["--verbose".to_string()];
        let resolved = substitute_pipe_id(&args, "ipc-anon-abc");
        assert_eq!(resolved, vec!["--verbose"]);
    }
}

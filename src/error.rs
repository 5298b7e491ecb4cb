use core::fmt::Debug;

use thiserror::Error;

use crate::coords::parser::ParseError;

/// Errors which may occur while servicing a debugger command or event drain.
///
/// `E` is the debug-API port's error type, propagated unchanged so the
/// embedding debugger can apply its own policy (most call sites treat it as
/// fatal for the current operation).
#[derive(Debug, Error)]
pub enum Error<E: Debug> {
    /// An event carried the reserved "no thread" id.
    #[error("A CUDA event reported an invalid thread id.")]
    InvalidThreadId,

    /// The user-supplied focus/filter string did not parse.
    #[error("Incorrect filter: '{input}'.")]
    InvalidFilter { input: String, source: ParseError },

    /// A `switch` request resolved to a different coordinate than the one
    /// the user asked for.
    #[error("Request cannot be satisfied. CUDA focus unchanged.")]
    UnsatisfiableFocus,

    /// A query was issued while the focus is not on any device.
    #[error("Focus not set on any active CUDA kernel.")]
    NoCurrentDevice,

    /// `info cuda` was invoked without a sub-command.
    #[error("Missing option.")]
    MissingArgument,

    /// `info cuda` was invoked with an unknown sub-command.
    #[error("Unrecognized option: '{0}'.")]
    UnrecognizedOption(String),

    /// The debug API reported an unrecoverable internal error. The session
    /// cannot continue; cleanup happens on process exit, not here.
    #[error(
        "Error: Internal error reported by CUDA debugger API (error={0}). \
         The application cannot be further debugged."
    )]
    CoreFatal(u32),

    /// A compute device is already in use for graphics.
    #[error(
        "A device about to be used for compute may already be in use for graphics.\n\
         This is an unsupported scenario. Further debugging might be unsafe. Aborting.\n\
         Disable the 'cuda gpu_busy_check' option to bypass the checking mechanism."
    )]
    DeviceUsedForGraphics,

    /// A debug-API call failed.
    #[error("CUDA debugger API call failed: {0:?}")]
    Api(E),
}

impl<E: Debug> Error<E> {
    pub(crate) fn api(e: E) -> Self {
        Error::Api(e)
    }
}

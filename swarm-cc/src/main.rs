//! swarm-cc: transparent compiler wrapper.
//!
//! Drop-in front of the real compiler driver: `swarm-cc cc -O2 -c foo.c -o
//! foo.o`. Recognized compile steps are preprocessed locally and compiled
//! on the least-loaded fleet host; everything else runs locally unchanged.
//! The exit status is the compiler's, wherever it ran.

mod build;
mod rewrite;

use std::process::ExitCode;

use tracing::error;

use swarm_common::args::ArgList;
use swarm_common::logging;

/// Exit status for fatal wrapper errors, distinct from any compiler status.
const EXIT_FATAL: u8 = 255;

fn main() -> ExitCode {
    logging::init(false);

    let args = match ArgList::from_argv(std::env::args()) {
        Ok(args) => args,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match build::run(args) {
        Ok(status) => ExitCode::from(status.clamp(0, 255) as u8),
        Err(err) => {
            error!("{err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

//! Print the per-layer cost table of the default network for a 3x10x10 input.
//!
//! Set `RUST_LOG=debug` to see construction logs.

use ecarn::{ECarn, stat};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    match ECarn::new() {
        Ok(net) => {
            println!("{}", stat(&net, &[3, 10, 10]));
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("failed to build network: {e}");
            ExitCode::FAILURE
        }
    }
}

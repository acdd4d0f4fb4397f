//! `wmdeploy` binary entry point.

use std::process::ExitCode;

fn main() -> ExitCode {
    let code = webmonitor_deploy::cli_app::main_with_args(std::env::args_os());
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

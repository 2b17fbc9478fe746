use std::process::ExitCode;

fn main() -> ExitCode {
    skillbridge_cli::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    llmbench_lib::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    match carapace::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

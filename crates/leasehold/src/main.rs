//! Leasehold CLI - exclusive and shared leases on named resources
//!
//! Binary name: `leasehold`

use std::process;

use leasehold::cli::{
    build_cli,
    handlers::{dispatch, error_json, exit_code, format_error},
    setup::{cancel_on_signal, init_tracing, json_requested},
};
use leasehold_core::cancel_pair;

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing() {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Warning: {e}");
        }
    }

    let (source, cancel) = cancel_pair();
    let result = match cancel_on_signal(source) {
        Ok(()) => dispatch(&build_cli().get_matches(), cancel).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(0) => {}
        Ok(code) => {
            #[allow(clippy::exit)]
            process::exit(code);
        }
        Err(err) => {
            if json_requested() {
                #[allow(clippy::print_stdout)]
                {
                    println!("{}", error_json(&err));
                }
            } else {
                #[allow(clippy::print_stderr)]
                {
                    eprintln!("Error: {}", format_error(&err));
                }
            }

            #[allow(clippy::exit)]
            process::exit(exit_code(&err));
        }
    }
}

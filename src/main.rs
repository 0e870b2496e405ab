use std::process;

fn main() {
    match ol_bootstrap::app::run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("fatal: {err:#}");
            process::exit(1);
        }
    }
}

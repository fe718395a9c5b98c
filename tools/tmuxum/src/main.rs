fn main() {
    match tmuxum::run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("tmuxum: {error}");
            std::process::exit(1);
        }
    }
}

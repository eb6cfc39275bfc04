fn main() {
    if let Err(err) = gompc_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

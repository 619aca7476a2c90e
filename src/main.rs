fn main() {
    if let Err(err) = adx_ingest::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

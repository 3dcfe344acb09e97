fn main() {
    if let Err(e) = evidence_store::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn main() {
    if let Err(err) = contact_ledger::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn main() {
    if let Err(e) = shred_lib::run() {
        eprintln!("shred: {}", e);
        std::process::exit(1);
    }
}

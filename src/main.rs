fn main() {
    if let Err(err) = borgrelay::cli::run() {
        eprintln!("borgrelay: {:#}", err);
        std::process::exit(1);
    }
}

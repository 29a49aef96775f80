fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = fieldsim::run(&args) {
        eprintln!("fieldsim: {}", err);
        std::process::exit(1);
    }
}

fn main() {
    if let Err(e) = trafficmeter_lib::run() {
        eprintln!("trafficmeter: {e:#}");
        std::process::exit(1);
    }
}

fn main() {
    traffic_heat::cli::run();
}

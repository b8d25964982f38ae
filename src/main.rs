fn main() {
    dusk::cli::run();
}

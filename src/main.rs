fn main() -> std::process::ExitCode {
    camrig_lib::run()
}

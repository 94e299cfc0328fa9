fn main() -> std::process::ExitCode {
    mero_hisab_lib::run()
}

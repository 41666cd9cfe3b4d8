/// Display version information
pub fn execute() {
    println!("relaybot {}", env!("CARGO_PKG_VERSION"));
    println!("Telegram registration and signal relay bot");
}

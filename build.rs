fn main() {
    // Stamp the binary with the time it was built
    let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC");
    println!("cargo:rustc-env=BUILD_DATE={}", stamp);
}

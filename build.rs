fn main() {
    // Rerun when the numeric fixtures change so the test binary picks them up
    println!("cargo:rerun-if-changed=tests/fixtures");

    let fixture_dir = std::path::Path::new("tests/fixtures");
    if let Ok(entries) = std::fs::read_dir(fixture_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                println!("cargo:rerun-if-changed={}", path.display());
            }
        }
    }
}

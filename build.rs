//! Build script for the FLI SDK bindings.
//!
//! Only emits link directives when the `flisdk` feature is enabled.

fn main() {
    println!("cargo:rerun-if-env-changed=FLISDK_DIR");

    if std::env::var_os("CARGO_FEATURE_FLISDK").is_none() {
        return;
    }

    let sdk_dir = std::env::var("FLISDK_DIR")
        .unwrap_or_else(|_| "/opt/FirstLightImaging/FliSdk".to_string());

    println!("cargo:rustc-link-search=native={}/lib/release", sdk_dir);
    println!("cargo:rustc-link-lib=dylib=FliSdk");
}

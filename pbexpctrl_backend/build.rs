use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=SPINAPI_LIB_DIR");
    if env::var_os("CARGO_FEATURE_SPINAPI").is_none() {
        return;
    }
    if let Ok(dir) = env::var("SPINAPI_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
}

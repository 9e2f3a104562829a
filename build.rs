use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=ydb_dist");
    if env::var_os("CARGO_FEATURE_NATIVE").is_none() {
        return;
    }

    // ydb_dist points at the installed engine, which carries libyottadb.so
    if let Some(dist) = env::var_os("ydb_dist") {
        println!("cargo:rustc-link-search=native={}", dist.to_string_lossy());
    }
    println!("cargo:rustc-link-lib=dylib=yottadb");
}

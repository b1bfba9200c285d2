fn main() {
    let nix_store = pkg_config::Config::new()
        .atleast_version("2.4")
        .probe("nix-store")
        .expect("pkg-config couldn't find nix-store (is the Nix C++ dev package installed?)");

    let mut build = cxx_build::bridge("src/lib.rs");
    build
        .file("src/shim.cc")
        .include(".")
        .flag_if_supported("-std=c++20");

    for path in &nix_store.include_paths {
        build.include(path);
    }

    build.compile("nix-store-sys");

    for path in &nix_store.link_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
    }
    for lib in &nix_store.libs {
        println!("cargo:rustc-link-lib=dylib={lib}");
    }

    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/shim.cc");
    println!("cargo:rerun-if-changed=include/shim.h");
}

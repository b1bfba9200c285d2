extern crate self as nix_compat;

pub mod nixbase32;
pub mod store_path;

use std::{env, fs, path::PathBuf};

/// Overrides the amount of transactions a driver gets, if `Config::backlog` is zero.
const DEFAULT_BACKLOG_ENV: &str = "ESP_ASYNC_CRC_DEFAULT_BACKLOG";
const DEFAULT_BACKLOG: u32 = 8;

fn main() {
    println!("cargo:rerun-if-env-changed={DEFAULT_BACKLOG_ENV}");
    let backlog = match env::var(DEFAULT_BACKLOG_ENV) {
        Ok(value) => match value.trim().parse::<u32>() {
            Ok(backlog) if backlog != 0 => backlog,
            _ => panic!("{DEFAULT_BACKLOG_ENV} must be a non-zero integer, got {value:?}."),
        },
        Err(_) => DEFAULT_BACKLOG,
    };
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    fs::write(
        out_dir.join("config.rs"),
        format!("/// Backlog used when `Config::backlog` is zero.\npub const DEFAULT_BACKLOG: u32 = {backlog};\n"),
    )
    .expect("Failed to write config.rs");
}

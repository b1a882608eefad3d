#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

pub mod config;
pub mod error;
pub mod filter;
pub mod logger;
pub mod ops;
pub mod server;
pub mod toolchain;

mod client;
mod http;

pub use client::CloudClient;

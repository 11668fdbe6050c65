mod client;
mod inspect;

pub use client::DockerCli;

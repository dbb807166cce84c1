#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod cloudinit;
pub mod commands;
pub mod config;
pub mod error;
pub mod kubeconfig;
pub mod lines;
pub mod multipass;
pub mod paths;
pub mod progress;
pub mod registry;
pub mod release;
pub mod util;

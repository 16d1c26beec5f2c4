pub mod backend;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod manager;
pub mod remote;

#![cfg_attr(not(test), no_std)]

pub mod netlog;

pub use netlog::{
    NetlogLevel, netlog_get_level, netlog_is_enabled, netlog_register_backend, netlog_set_level,
};
